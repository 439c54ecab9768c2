//! Config schema types for the extension host.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default cap on any single plugin network response (10 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HikariConfig {
    /// Where installed extensions and repository lists are persisted.
    /// Falls back to the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub extensions: ExtensionsConfig,
    pub network: NetworkConfig,
    pub sandbox: SandboxConfig,
}

/// Extension lifecycle behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Fail hard on duplicate source ids and mutations of unknown ids instead
    /// of logging and ignoring them. Defaults to false.
    pub strict: bool,
    /// Repositories added on startup when a kind has no repositories yet.
    pub default_repos: DefaultRepos,
}

/// Seed repository URLs per content kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultRepos {
    pub manga: Vec<String>,
    pub anime: Vec<String>,
}

/// Outbound HTTP settings shared by repository fetches and the plugin
/// network capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub user_agent: String,
    /// Per-request timeout. `None` leaves cancellation to the caller.
    pub timeout_secs: Option<u64>,
    /// Largest response body handed to a plugin.
    pub max_response_bytes: usize,
    /// Redirects followed before a plugin request fails.
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("hikari/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: None,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_redirects: 5,
        }
    }
}

/// Resource ceilings for each plugin instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Linear memory ceiling per plugin in bytes. Defaults to 32 MiB.
    pub max_memory_bytes: usize,
    /// Fuel granted before every guest call. Defaults to 500M.
    pub fuel_per_call: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 32 * 1024 * 1024,
            fuel_per_call: 500_000_000,
        }
    }
}
