//! Sandbox loader: installed records in, live sources out.
//!
//! The loader never touches the network itself; guests reach it only
//! through the capability handed to the [`WasmRuntime`].

pub mod capabilities;
pub mod runtime;

use std::{collections::BTreeMap, sync::Arc};

use {
    futures::future::join_all,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    kind::ContentKind,
    metrics,
    source::Source,
    store::InstalledExtensionStore,
    types::{ExtensionState, LoadError},
};

pub use {
    capabilities::{FetchRequest, FetchResponse, HostCapabilities, HttpCapabilities},
    runtime::{WasmRuntime, WasmSource, decode_bundle},
};

/// Loads the enabled extensions of one content kind and remembers why the
/// others failed.
pub struct SandboxLoader {
    kind: ContentKind,
    store: Arc<InstalledExtensionStore>,
    runtime: Arc<WasmRuntime>,
    loaded: BTreeMap<String, Arc<dyn Source>>,
    errors: BTreeMap<String, String>,
    initialized: bool,
}

impl SandboxLoader {
    pub fn new(
        kind: ContentKind,
        store: Arc<InstalledExtensionStore>,
        runtime: Arc<WasmRuntime>,
    ) -> Self {
        Self {
            kind,
            store,
            runtime,
            loaded: BTreeMap::new(),
            errors: BTreeMap::new(),
            initialized: false,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Evaluate `code` under `expected_id` without recording anything.
    pub async fn execute_bundle(&self, code: &str, expected_id: &str) -> Result<Arc<dyn Source>> {
        let source = self.runtime.load(self.kind, expected_id, code).await?;
        Ok(Arc::new(source))
    }

    /// Load every enabled record. Runs once; later calls are no-ops until
    /// [`reload`](Self::reload). Returns the number of loaded sources.
    pub async fn initialize(&mut self) -> usize {
        if self.initialized {
            return self.loaded.len();
        }
        self.initialized = true;

        let records = self.store.get_enabled();
        let attempts = join_all(
            records
                .iter()
                .map(|record| self.execute_bundle(&record.code, &record.id)),
        )
        .await;

        for (record, outcome) in records.iter().zip(attempts) {
            self.record_outcome(&record.id, outcome);
        }
        info!(
            kind = %self.kind,
            loaded = self.loaded.len(),
            failed = self.errors.len(),
            "extensions initialized"
        );
        self.loaded.len()
    }

    /// Load (or re-load) one installed, enabled extension.
    pub async fn load_extension(&mut self, id: &str) -> Result<Arc<dyn Source>> {
        let Some(record) = self.store.get(id) else {
            self.unload_extension(id);
            return Err(Error::NotFound {
                kind: self.kind,
                id: id.to_string(),
            });
        };
        if !record.enabled {
            self.unload_extension(id);
            return Err(Error::Disabled {
                kind: self.kind,
                id: id.to_string(),
            });
        }

        match self.execute_bundle(&record.code, id).await {
            Ok(source) => {
                self.record_loaded(id, Arc::clone(&source));
                Ok(source)
            },
            Err(e) => {
                self.record_failure(id, &e);
                Err(e)
            },
        }
    }

    fn record_outcome(&mut self, id: &str, outcome: Result<Arc<dyn Source>>) {
        match outcome {
            Ok(source) => self.record_loaded(id, source),
            Err(e) => self.record_failure(id, &e),
        }
    }

    fn record_loaded(&mut self, id: &str, source: Arc<dyn Source>) {
        debug!(kind = %self.kind, %id, "extension loaded");
        self.errors.remove(id);
        self.loaded.insert(id.to_string(), source);
        metrics::record_load(self.kind, true);
    }

    fn record_failure(&mut self, id: &str, error: &Error) {
        warn!(kind = %self.kind, %id, %error, "extension failed to load");
        self.loaded.remove(id);
        self.errors.insert(id.to_string(), error.to_string());
        metrics::record_load(self.kind, false);
    }

    /// Record a failure for a source that evaluated but cannot be exposed.
    pub(crate) fn reject(&mut self, id: &str, message: impl Into<String>) {
        self.loaded.remove(id);
        self.errors.insert(id.to_string(), message.into());
    }

    /// Drop a loaded source and any stale error. Returns whether it was
    /// loaded.
    pub fn unload_extension(&mut self, id: &str) -> bool {
        self.errors.remove(id);
        let removed = self.loaded.remove(id).is_some();
        if removed {
            debug!(kind = %self.kind, %id, "extension unloaded");
        }
        removed
    }

    /// Forget all loaded and error state and load everything again.
    pub async fn reload(&mut self) -> usize {
        self.loaded.clear();
        self.errors.clear();
        self.initialized = false;
        self.initialize().await
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.loaded.get(id).cloned()
    }

    pub fn get_loaded(&self) -> Vec<Arc<dyn Source>> {
        self.loaded.values().cloned().collect()
    }

    pub fn load_error(&self, id: &str) -> Option<&str> {
        self.errors.get(id).map(String::as_str)
    }

    pub fn load_errors(&self) -> Vec<LoadError> {
        self.errors
            .iter()
            .map(|(id, message)| LoadError {
                extension_id: id.clone(),
                message: message.clone(),
            })
            .collect()
    }

    pub fn state(&self, id: &str) -> ExtensionState {
        if self.loaded.contains_key(id) {
            ExtensionState::Loaded
        } else if let Some(message) = self.errors.get(id) {
            ExtensionState::Failed(message.clone())
        } else {
            ExtensionState::Unloaded
        }
    }
}
