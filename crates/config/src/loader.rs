use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::HikariConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["hikari.toml", "hikari.yaml", "hikari.yml", "hikari.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<HikariConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./hikari.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/hikari.{toml,yaml,yml,json}` (user-global)
///
/// Returns `HikariConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> HikariConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    HikariConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (e.g. `~/.config/hikari/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hikari").map(|d| d.config_dir().to_path_buf())
}

/// Resolve the data directory: explicit config value, then the platform data
/// directory, then `./.hikari`.
pub fn data_dir(config: &HikariConfig) -> PathBuf {
    if let Some(dir) = &config.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "hikari")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".hikari"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<HikariConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
