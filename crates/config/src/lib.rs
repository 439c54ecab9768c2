//! Configuration loading, validation and env substitution.
//!
//! Config files: `hikari.toml`, `hikari.yaml`, `hikari.yml` or `hikari.json`,
//! searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config},
    schema::{DefaultRepos, ExtensionsConfig, HikariConfig, NetworkConfig, SandboxConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
