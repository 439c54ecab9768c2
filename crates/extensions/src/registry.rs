//! Merged, id-keyed view of built-in and loaded sources for one kind.
//!
//! Built-ins are registered first on every rebuild, so they cannot be
//! shadowed. A loaded extension that collides with one is kept out of the
//! registry and its id gets a load error instead.

use std::{collections::HashSet, sync::Arc};

use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    kind::ContentKind,
    sandbox::SandboxLoader,
    source::Source,
    types::{ExtensionState, LoadError},
};

pub struct SourceRegistry {
    kind: ContentKind,
    strict: bool,
    loader: SandboxLoader,
    builtins: Vec<Arc<dyn Source>>,
    builtin_ids: HashSet<String>,
    sources: Vec<Arc<dyn Source>>,
    initialized: bool,
}

impl SourceRegistry {
    pub fn new(
        loader: SandboxLoader,
        builtins: Vec<Arc<dyn Source>>,
        strict: bool,
    ) -> Self {
        let kind = loader.kind();
        let builtins: Vec<_> = builtins
            .into_iter()
            .filter(|source| {
                let same_kind = source.kind() == kind;
                if !same_kind {
                    warn!(%kind, id = %source.id(), source_kind = %source.kind(), "ignoring built-in source of another kind");
                }
                same_kind
            })
            .collect();
        let builtin_ids = builtins.iter().map(|s| s.id().to_string()).collect();
        Self {
            kind,
            strict,
            loader,
            builtins,
            builtin_ids,
            sources: Vec::new(),
            initialized: false,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn loader(&self) -> &SandboxLoader {
        &self.loader
    }

    /// Load installed extensions and build the merged view. Idempotent.
    pub async fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.loader.initialize().await;
        self.rebuild();
    }

    /// Drop everything, reload every enabled extension, and rebuild.
    pub async fn reload(&mut self) {
        self.sources.clear();
        self.loader.reload().await;
        self.initialized = true;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.sources.clear();
        for source in self.builtins.clone() {
            self.insert(source);
        }
        for source in self.loader.get_loaded() {
            let id = source.id().to_string();
            if self.builtin_ids.contains(&id) {
                warn!(kind = %self.kind, %id, "extension collides with a built-in source");
                self.loader
                    .reject(&id, format!("source id {id} is reserved by a built-in source"));
                continue;
            }
            self.insert(source);
        }
        info!(
            kind = %self.kind,
            sources = self.sources.len(),
            builtins = self.builtins.len(),
            "source registry rebuilt"
        );
    }

    fn insert(&mut self, source: Arc<dyn Source>) -> bool {
        if self.has(source.id()) {
            warn!(kind = %self.kind, id = %source.id(), "duplicate source id, keeping the existing entry");
            return false;
        }
        self.sources.push(source);
        true
    }

    /// Add a source directly. A duplicate id never replaces the existing
    /// entry: it is ignored, or rejected in strict mode. Sources of another
    /// kind are ignored.
    pub fn register(&mut self, source: Arc<dyn Source>) -> Result<bool> {
        if source.kind() != self.kind {
            warn!(kind = %self.kind, id = %source.id(), source_kind = %source.kind(), "ignoring source of another kind");
            return Ok(false);
        }
        if self.strict && self.has(source.id()) {
            return Err(Error::DuplicateSourceId {
                id: source.id().to_string(),
            });
        }
        Ok(self.insert(source))
    }

    /// Remove a source directly. Built-ins stay.
    pub fn unregister(&mut self, id: &str) -> Result<bool> {
        if self.builtin_ids.contains(id) {
            warn!(kind = %self.kind, %id, "built-in sources cannot be unregistered");
            return Ok(false);
        }
        let before = self.sources.len();
        self.sources.retain(|s| s.id() != id);
        if self.sources.len() == before {
            if self.strict {
                return Err(Error::NotFound {
                    kind: self.kind,
                    id: id.to_string(),
                });
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Load one extension and expose it immediately, without a full reload.
    pub async fn load_extension(&mut self, id: &str) -> Result<Arc<dyn Source>> {
        if self.builtin_ids.contains(id) {
            let err = Error::DuplicateSourceId { id: id.to_string() };
            self.loader.reject(id, err.to_string());
            return Err(err);
        }
        self.sources.retain(|s| s.id() != id);
        let source = self.loader.load_extension(id).await?;
        self.sources.push(Arc::clone(&source));
        Ok(source)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.sources.iter().find(|s| s.id() == id).cloned()
    }

    /// Built-ins first, then loaded extensions by id.
    pub fn get_all(&self) -> Vec<Arc<dyn Source>> {
        self.sources.clone()
    }

    pub fn get_by_lang(&self, lang: &str) -> Vec<Arc<dyn Source>> {
        self.sources
            .iter()
            .filter(|s| s.info().lang.eq_ignore_ascii_case(lang))
            .cloned()
            .collect()
    }

    pub fn has(&self, id: &str) -> bool {
        self.sources.iter().any(|s| s.id() == id)
    }

    pub fn is_builtin(&self, id: &str) -> bool {
        self.builtin_ids.contains(id)
    }

    pub fn load_error(&self, id: &str) -> Option<String> {
        self.loader.load_error(id).map(str::to_string)
    }

    pub fn load_errors(&self) -> Vec<LoadError> {
        self.loader.load_errors()
    }

    pub fn state(&self, id: &str) -> ExtensionState {
        if self.builtin_ids.contains(id) {
            return ExtensionState::Loaded;
        }
        self.loader.state(id)
    }
}
