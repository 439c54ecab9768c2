//! Catalog format detection.
//!
//! Repository URLs pasted by users often point at catalogs published for
//! other reader apps. Those are recognised here so the user gets an explicit
//! "incompatible format" error instead of a generic parse failure.

use serde_json::Value;

/// Detected format of a repository index payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    /// `{ name, extensions: [...] }`.
    Native,
    /// Array of APK descriptors (`pkg`, `apk`, `code`, ...), as served by
    /// Android extension repositories.
    ApkIndex,
    /// `{ pluginLists: [...] }` repository descriptor used by CloudStream.
    PluginList,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for CatalogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::ApkIndex => write!(f, "Android APK index"),
            Self::PluginList => write!(f, "CloudStream plugin list"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl CatalogFormat {
    /// Whether this is a recognised catalog shape that hikari cannot use.
    #[must_use]
    pub fn is_foreign(self) -> bool {
        matches!(self, Self::ApkIndex | Self::PluginList)
    }
}

const APK_MARKERS: &[&str] = &["apk", "pkg"];

/// Classify a parsed index payload.
#[must_use]
pub fn detect_format(payload: &Value) -> CatalogFormat {
    match payload {
        Value::Array(items) => {
            let apk_like = !items.is_empty()
                && items.iter().all(|item| {
                    item.as_object()
                        .is_some_and(|obj| APK_MARKERS.iter().any(|k| obj.contains_key(*k)))
                });
            if apk_like {
                CatalogFormat::ApkIndex
            } else {
                CatalogFormat::Unknown
            }
        },
        Value::Object(obj) => {
            if obj.get("pluginLists").is_some_and(Value::is_array) {
                CatalogFormat::PluginList
            } else if obj.contains_key("extensions") || obj.contains_key("name") {
                CatalogFormat::Native
            } else {
                CatalogFormat::Unknown
            }
        },
        _ => CatalogFormat::Unknown,
    }
}
