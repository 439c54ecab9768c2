use thiserror::Error;

use crate::kind::ContentKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("repository URL \"{url}\" is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("repository {url} is unreachable: {reason}")]
    RepoUnreachable { url: String, reason: String },

    #[error("repository index not found at {url} (HTTP 404); check the repository URL")]
    RepoNotFound { url: String },

    #[error("repository {url} returned a malformed index: {reason}")]
    RepoMalformed { url: String, reason: String },

    #[error(
        "repository {url} uses the {format} catalog format, which is not compatible with hikari extensions"
    )]
    RepoIncompatible { url: String, format: String },

    #[error("repository {url} is already added")]
    DuplicateRepo { url: String },

    #[error("bundle {url} is unreachable: {reason}")]
    BundleUnreachable { url: String, reason: String },

    #[error("extension {id} has an empty bundle")]
    BundleEmpty { id: String },

    #[error("extension {id} failed to evaluate: {reason}")]
    BundleExecutionFailed { id: String, reason: String },

    #[error("extension {id} does not expose a usable source: {reason}")]
    BundleInvalidShape { id: String, reason: String },

    #[error("a source with id {id} is already registered")]
    DuplicateSourceId { id: String },

    #[error("{kind} extension {id} not found")]
    NotFound { kind: ContentKind, id: String },

    #[error("{kind} extension {id} is disabled")]
    Disabled { kind: ContentKind, id: String },

    #[error("{kind} extension {id} is already installed; uninstall it first")]
    AlreadyInstalled { kind: ContentKind, id: String },

    #[error("extension {id} is not listed by repository {repo_url}")]
    NotInCatalog { repo_url: String, id: String },

    #[error("source {id} does not provide {method}")]
    MethodUnsupported { id: String, method: String },

    #[error("source {id} failed in {method}: {reason}")]
    SourceCall {
        id: String,
        method: String,
        reason: String,
    },

    #[error("storage key {key}: {reason}")]
    Storage { key: String, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn storage(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn source_call(id: &str, method: &str, reason: impl std::fmt::Display) -> Self {
        Self::SourceCall {
            id: id.to_string(),
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl hikari_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

hikari_common::impl_context!();
