//! The capability interface every live source satisfies, whether built into
//! the host or loaded from an extension bundle.

use {async_trait::async_trait, serde_json::Value};

use crate::{
    error::{Error, Result},
    kind::ContentKind,
    types::{SearchFilter, SearchPage, SourceInfo},
};

/// A content provider consumed by the rest of the application.
///
/// The three retrieval methods map onto the kind's method set: for manga
/// they are details, chapters and chapter pages; for anime they are info,
/// episodes and episode streams. Payloads are passed through as JSON.
#[async_trait]
pub trait Source: Send + Sync {
    fn info(&self) -> &SourceInfo;

    fn kind(&self) -> ContentKind;

    fn id(&self) -> &str {
        &self.info().id
    }

    async fn search(&self, filter: &SearchFilter) -> Result<SearchPage>;

    /// Metadata for one title.
    async fn details(&self, _id: &str) -> Result<Value> {
        Err(self.unsupported(self.kind().methods().details))
    }

    /// Chapters or episodes belonging to a title.
    async fn children(&self, _parent_id: &str) -> Result<Value> {
        Err(self.unsupported(self.kind().methods().children))
    }

    /// Pages of a chapter or playable streams of an episode. `server` is
    /// only meaningful for anime sources.
    async fn content(&self, _child_id: &str, _server: Option<&str>) -> Result<Value> {
        Err(self.unsupported(self.kind().methods().content))
    }

    #[doc(hidden)]
    fn unsupported(&self, method: &str) -> Error {
        Error::MethodUnsupported {
            id: self.id().to_string(),
            method: method.to_string(),
        }
    }
}

impl std::fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
