//! Content kinds and the method set each kind's sources expose.

use serde::{Deserialize, Serialize};

/// The two content domains the host supports. One generic stack of
/// repository client, store, loader and registry exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Manga,
    Anime,
}

/// Guest export names for a kind's three retrieval methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMethods {
    /// Full metadata for one title.
    pub details: &'static str,
    /// Chapters or episodes of a title.
    pub children: &'static str,
    /// Pages of a chapter, or playable sources of an episode.
    pub content: &'static str,
}

const MANGA_METHODS: KindMethods = KindMethods {
    details: "getDetails",
    children: "getChapters",
    content: "getChapterPages",
};

const ANIME_METHODS: KindMethods = KindMethods {
    details: "getInfo",
    children: "getEpisodes",
    content: "getEpisodeSources",
};

impl ContentKind {
    pub const ALL: [ContentKind; 2] = [ContentKind::Manga, ContentKind::Anime];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manga => "manga",
            Self::Anime => "anime",
        }
    }

    #[must_use]
    pub fn methods(self) -> KindMethods {
        match self {
            Self::Manga => MANGA_METHODS,
            Self::Anime => ANIME_METHODS,
        }
    }

    /// Whether the content method accepts a server hint (anime streams do).
    #[must_use]
    pub fn content_takes_server(self) -> bool {
        matches!(self, Self::Anime)
    }

    /// Persistence key for installed extension records.
    #[must_use]
    pub fn extensions_key(self) -> String {
        format!("{}_extensions", self.as_str())
    }

    /// Persistence key for the repository list.
    #[must_use]
    pub fn repos_key(self) -> String {
        format!("{}_repos", self.as_str())
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manga" => Ok(Self::Manga),
            "anime" => Ok(Self::Anime),
            other => Err(format!("unknown content kind \"{other}\" (expected manga or anime)")),
        }
    }
}
