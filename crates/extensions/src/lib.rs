//! Source extensions: repositories, installed state, sandboxed loading and
//! the merged source registry, for both manga and anime.
//!
//! Discovery flows repository → catalog → store; activation flows
//! store → sandbox loader → registry. [`ExtensionHost`] wires one such stack
//! per [`ContentKind`].

pub mod error;
pub mod formats;
pub mod host;
pub mod kind;
pub mod kv;
pub mod metrics;
pub mod registry;
pub mod repository;
pub mod sandbox;
pub mod source;
pub mod store;
pub mod types;

pub use {
    error::{Error, Result},
    host::{ExtensionHost, ExtensionHostBuilder, InstallOutcome, KindContext},
    kind::{ContentKind, KindMethods},
    kv::{JsonFileStore, KeyValueStore, MemoryStore},
    registry::SourceRegistry,
    repository::RepositoryClient,
    sandbox::{
        FetchRequest, FetchResponse, HostCapabilities, HttpCapabilities, SandboxLoader,
        WasmRuntime,
    },
    source::Source,
    store::InstalledExtensionStore,
    types::{
        AvailableUpdate, CatalogEntry, ExtensionState, InstalledExtensionRecord, LoadError,
        RepositoryCatalog, RepositoryRecord, SearchFilter, SearchPage, SourceInfo,
    },
};
