//! Configuration validation.
//!
//! Flags unknown or misspelled keys and values that would make the extension
//! host unusable (zero sandbox limits, malformed seed repository URLs).

use std::path::{Path, PathBuf};

use crate::schema::HikariConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "limits" or "url".
    pub category: &'static str,
    /// Dotted path, e.g. "sandbox.fuel_per_call".
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, category: &'static str, path: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.to_string(),
            message,
        });
    }
}

const TOP_LEVEL_KEYS: &[&str] = &["data_dir", "extensions", "network", "sandbox"];
const SECTION_KEYS: &[(&str, &[&str])] = &[
    ("extensions", &["strict", "default_repos"]),
    ("network", &[
        "user_agent",
        "timeout_secs",
        "max_response_bytes",
        "max_redirects",
    ]),
    ("sandbox", &["max_memory_bytes", "fuel_per_call"]),
];

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

/// Validate a config file at `path`, or the discovered config file when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        let mut result = ValidationResult::default();
        result.push(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults".into(),
        );
        return result;
    };

    let is_toml = actual_path
        .extension()
        .is_none_or(|ext| ext.eq_ignore_ascii_case("toml"));
    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) if is_toml => validate_toml_str(&crate::env_subst::substitute_env(&content)),
        Ok(_) => match crate::loader::load_config(&actual_path) {
            Ok(config) => validate_config(&config),
            Err(e) => {
                let mut result = ValidationResult::default();
                result.push(Severity::Error, "syntax", "", format!("{e:#}"));
                result
            },
        },
        Err(e) => {
            let mut result = ValidationResult::default();
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            );
            result
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate TOML text without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            );
            return result;
        },
    };

    if let Some(table) = value.as_table() {
        check_unknown_fields(table, &mut result);
    }

    match toml::from_str::<HikariConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut result),
        Err(e) => result.push(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        ),
    }

    result
}

/// Validate an already-parsed config (used at startup regardless of format).
#[must_use]
pub fn validate_config(config: &HikariConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_semantics(config, &mut result);
    result
}

fn check_unknown_fields(table: &toml::map::Map<String, toml::Value>, result: &mut ValidationResult) {
    for (key, child) in table {
        let Some((_, fields)) = SECTION_KEYS.iter().find(|(name, _)| *name == key.as_str()) else {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                let message = match suggest(key, TOP_LEVEL_KEYS, 3) {
                    Some(s) => format!("unknown field at top level (did you mean \"{s}\"?)"),
                    None => "unknown field at top level".to_string(),
                };
                result.push(Severity::Error, "unknown-field", key, message);
            }
            continue;
        };

        let Some(section) = child.as_table() else {
            continue;
        };
        for inner in section.keys() {
            if fields.contains(&inner.as_str()) {
                continue;
            }
            let message = match suggest(inner, fields, 3) {
                Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                None => "unknown field".to_string(),
            };
            result.push(
                Severity::Error,
                "unknown-field",
                &format!("{key}.{inner}"),
                message,
            );
        }
    }
}

fn check_semantics(config: &HikariConfig, result: &mut ValidationResult) {
    if config.sandbox.fuel_per_call == 0 {
        result.push(
            Severity::Error,
            "limits",
            "sandbox.fuel_per_call",
            "fuel budget of 0 makes every plugin call fail".into(),
        );
    }
    if config.sandbox.max_memory_bytes < 64 * 1024 {
        result.push(
            Severity::Error,
            "limits",
            "sandbox.max_memory_bytes",
            "memory ceiling is smaller than one WebAssembly page (64 KiB)".into(),
        );
    }
    if config.network.max_response_bytes == 0 {
        result.push(
            Severity::Error,
            "limits",
            "network.max_response_bytes",
            "plugins could never receive a response body".into(),
        );
    }
    if config.network.user_agent.trim().is_empty() {
        result.push(
            Severity::Warning,
            "limits",
            "network.user_agent",
            "empty user agent; some repositories reject anonymous clients".into(),
        );
    }
    if config.network.timeout_secs == Some(0) {
        result.push(
            Severity::Warning,
            "limits",
            "network.timeout_secs",
            "timeout of 0 seconds fails every request".into(),
        );
    }

    let repos = &config.extensions.default_repos;
    for (kind, urls) in [("manga", &repos.manga), ("anime", &repos.anime)] {
        for (i, raw) in urls.iter().enumerate() {
            let path = format!("extensions.default_repos.{kind}[{i}]");
            match url::Url::parse(raw.trim()) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {},
                Ok(u) => result.push(
                    Severity::Error,
                    "url",
                    &path,
                    format!("scheme \"{}\" is not supported; use http or https", u.scheme()),
                ),
                Err(e) => result.push(Severity::Error, "url", &path, format!("invalid URL: {e}")),
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("sandbox", "sandbox"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("sandbx", "sandbox"), 1);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_toml_str("[sandbx]\nfuel_per_call = 10\n");
        let diag = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .unwrap();
        assert_eq!(diag.path, "sandbx");
        assert!(diag.message.contains("\"sandbox\""));
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = validate_toml_str("[network]\nuser_agnt = \"x\"\n");
        let diag = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .unwrap();
        assert_eq!(diag.path, "network.user_agnt");
        assert!(diag.message.contains("\"user_agent\""));
    }

    #[test]
    fn zero_fuel_is_error() {
        let result = validate_toml_str("[sandbox]\nfuel_per_call = 0\n");
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "sandbox.fuel_per_call")
        );
    }

    #[test]
    fn bad_seed_repo_url_is_error() {
        let result = validate_toml_str(
            "[extensions.default_repos]\nmanga = [\"ftp://example.com/repo\", \"not a url\"]\n",
        );
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("[extensions\nstrict = true");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_detected() {
        let result = validate_toml_str("[extensions]\nstrict = \"yes\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn validate_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hikari.toml");
        std::fs::write(&path, "[sandbox]\nmax_memory_bytes = 10\n").unwrap();
        let result = validate(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
