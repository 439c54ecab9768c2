use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kind::ContentKind;

// ── Repositories ────────────────────────────────────────────────────────────

/// A repository the user has added. Removing one never touches extensions
/// already installed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub url: String,
    pub display_name: String,
    pub added_at: u64,
}

/// Parsed `index.json` of a repository, with entries already validated and
/// resolved against the repository URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCatalog {
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub extensions: Vec<CatalogEntry>,
}

/// An installable extension as listed by a repository. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    /// Falls back to `id` when the manifest omits it.
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Absolute once the catalog has been resolved.
    pub bundle_url: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Stamped by the repository client; a manifest may also declare it.
    #[serde(default, alias = "contentKind")]
    pub kind: Option<ContentKind>,
}

// ── Installed extensions ────────────────────────────────────────────────────

/// Durable record of an installed extension, including its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledExtensionRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub lang: String,
    pub nsfw: bool,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub repo_url: String,
    pub code: String,
    pub enabled: bool,
    pub installed_at: u64,
}

/// An installed version that a repository has superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableUpdate {
    pub id: String,
    pub installed: String,
    pub available: String,
    pub repo_url: String,
}

// ── Sources ─────────────────────────────────────────────────────────────────

/// Identity and display metadata of a live source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub nsfw: bool,
}

/// Search request passed to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    pub query: String,
    #[serde(default = "first_page")]
    pub page: u32,
    /// Source-specific filters (genre, sort order, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, serde_json::Value>,
}

fn first_page() -> u32 {
    1
}

impl SearchFilter {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: 1,
            filters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub results: Vec<serde_json::Value>,
    pub has_next_page: bool,
}

/// The last load failure recorded for an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    pub extension_id: String,
    pub message: String,
}

/// Observable load state of an installed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "error")]
pub enum ExtensionState {
    Unloaded,
    Loaded,
    Failed(String),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_entry_optional_fields_default() {
        let entry: CatalogEntry = serde_json::from_str(
            r#"{"id":"a","version":"1.0","lang":"en","nsfw":false,"bundleUrl":"a.wat"}"#,
        )
        .unwrap();
        assert_eq!(entry.name, "");
        assert!(entry.icon_url.is_none());
        assert!(entry.kind.is_none());
    }

    #[test]
    fn catalog_entry_reads_declared_kind() {
        let entry: CatalogEntry = serde_json::from_str(
            r#"{"id":"a","version":"1","bundleUrl":"a.wat","contentKind":"anime"}"#,
        )
        .unwrap();
        assert_eq!(entry.kind, Some(ContentKind::Anime));
    }

    #[test]
    fn record_uses_camel_case_on_disk() {
        let record = InstalledExtensionRecord {
            id: "a".into(),
            name: "A".into(),
            version: "1.0".into(),
            lang: "en".into(),
            nsfw: false,
            icon_url: None,
            repo_url: "https://x/repo".into(),
            code: "(module)".into(),
            enabled: true,
            installed_at: 7,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["repoUrl"], "https://x/repo");
        assert_eq!(json["installedAt"], 7);
    }

    #[test]
    fn search_filter_defaults_to_first_page() {
        let filter: SearchFilter = serde_json::from_str(r#"{"query":"one piece"}"#).unwrap();
        assert_eq!(filter.page, 1);
        let json = serde_json::to_string(&SearchFilter::new("x").page(3)).unwrap();
        assert_eq!(json, r#"{"query":"x","page":3}"#);
    }
}
