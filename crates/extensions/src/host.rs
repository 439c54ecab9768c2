//! The owned extension context handed to the rest of the application.
//!
//! Every mutation of installed state goes through [`KindContext`], which
//! follows it with the registry reload readers rely on. The registry sits
//! behind an async `RwLock`, so reloads are serialised against each other
//! and against readers.

use std::sync::Arc;

use {
    hikari_config::HikariConfig,
    tokio::sync::RwLock,
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    kind::ContentKind,
    kv::KeyValueStore,
    registry::SourceRegistry,
    repository::{RepositoryClient, build_http_client, normalize_repo_url},
    sandbox::{HostCapabilities, SandboxLoader, WasmRuntime},
    source::Source,
    store::InstalledExtensionStore,
    types::{AvailableUpdate, ExtensionState, InstalledExtensionRecord, LoadError},
};

/// Result of an install. The record is persisted even when loading failed.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub record: InstalledExtensionRecord,
    pub load_error: Option<String>,
}

/// Repository client, store and registry of one content kind.
pub struct KindContext {
    kind: ContentKind,
    repos: RepositoryClient,
    store: Arc<InstalledExtensionStore>,
    registry: RwLock<SourceRegistry>,
    default_repos: Vec<String>,
}

impl KindContext {
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn repos(&self) -> &RepositoryClient {
        &self.repos
    }

    pub fn store(&self) -> &InstalledExtensionStore {
        &self.store
    }

    /// Seed default repositories on first start, then load extensions.
    pub async fn initialize(&self) {
        self.repos.seed(&self.default_repos).await;
        self.registry.write().await.initialize().await;
    }

    pub async fn reload(&self) {
        self.registry.write().await.reload().await;
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Install `extension_id` from the repository at `repo_url` and load it.
    pub async fn install(&self, repo_url: &str, extension_id: &str) -> Result<InstallOutcome> {
        let entry = self.repos.find_entry(repo_url, extension_id).await?;
        if self.store.get(&entry.id).is_some() {
            return Err(Error::AlreadyInstalled {
                kind: self.kind,
                id: entry.id,
            });
        }

        let code = self.repos.fetch_extension_bundle(&entry.bundle_url).await?;
        if code.trim().is_empty() {
            return Err(Error::BundleEmpty { id: entry.id });
        }

        let repo_url = normalize_repo_url(repo_url)?;
        if !self.store.install(&entry, &repo_url, &code)? {
            return Err(Error::AlreadyInstalled {
                kind: self.kind,
                id: entry.id,
            });
        }

        let load_error = match self.registry.write().await.load_extension(&entry.id).await {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        let record = self.store.get(&entry.id).ok_or_else(|| Error::NotFound {
            kind: self.kind,
            id: entry.id.clone(),
        })?;
        info!(kind = %self.kind, id = %record.id, loaded = load_error.is_none(), "install finished");
        Ok(InstallOutcome { record, load_error })
    }

    pub async fn uninstall(&self, id: &str) -> Result<bool> {
        let removed = self.store.uninstall(id)?;
        self.reload().await;
        Ok(removed)
    }

    pub async fn enable(&self, id: &str) -> Result<bool> {
        let found = self.store.enable(id)?;
        self.reload().await;
        Ok(found)
    }

    pub async fn disable(&self, id: &str) -> Result<bool> {
        let found = self.store.disable(id)?;
        self.reload().await;
        Ok(found)
    }

    /// Returns the new enabled state, or `None` for an unknown id.
    pub async fn toggle(&self, id: &str) -> Result<Option<bool>> {
        let state = self.store.toggle(id)?;
        self.reload().await;
        Ok(state)
    }

    /// Update one installed extension from its repository. Returns the
    /// applied update, or `None` when it is already current.
    pub async fn update(&self, id: &str) -> Result<Option<AvailableUpdate>> {
        let record = self.store.get(id).ok_or_else(|| Error::NotFound {
            kind: self.kind,
            id: id.to_string(),
        })?;
        let entry = self.repos.find_entry(&record.repo_url, id).await?;
        if !self.store.has_update(id, &entry.version) {
            return Ok(None);
        }

        let code = self.repos.fetch_extension_bundle(&entry.bundle_url).await?;
        if code.trim().is_empty() {
            return Err(Error::BundleEmpty { id: entry.id });
        }
        self.store.update(&entry, &code)?;
        self.reload().await;
        Ok(Some(AvailableUpdate {
            id: entry.id,
            installed: record.version,
            available: entry.version,
            repo_url: record.repo_url,
        }))
    }

    /// Installed extensions whose own repository lists a newer version.
    /// Other repositories are ignored, so every reported update is one
    /// [`update`](Self::update) can apply.
    pub async fn check_updates(&self) -> Vec<AvailableUpdate> {
        let catalogs = self.repos.fetch_all_extensions().await;
        let mut updates: Vec<AvailableUpdate> = Vec::new();
        for catalog in &catalogs {
            for entry in &catalog.extensions {
                let Some(record) = self.store.get(&entry.id) else {
                    continue;
                };
                if record.repo_url != catalog.url || !self.store.has_update(&entry.id, &entry.version)
                {
                    continue;
                }
                updates.push(AvailableUpdate {
                    id: entry.id.clone(),
                    installed: record.version,
                    available: entry.version.clone(),
                    repo_url: catalog.url.clone(),
                });
            }
        }
        updates
    }

    // ── Readers ─────────────────────────────────────────────────────────────

    pub async fn get_source(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.registry.read().await.get(id)
    }

    pub async fn get_all_sources(&self) -> Vec<Arc<dyn Source>> {
        self.registry.read().await.get_all()
    }

    pub async fn get_sources_by_lang(&self, lang: &str) -> Vec<Arc<dyn Source>> {
        self.registry.read().await.get_by_lang(lang)
    }

    pub async fn load_error(&self, id: &str) -> Option<String> {
        self.registry.read().await.load_error(id)
    }

    pub async fn load_errors(&self) -> Vec<LoadError> {
        self.registry.read().await.load_errors()
    }

    pub async fn state(&self, id: &str) -> ExtensionState {
        self.registry.read().await.state(id)
    }

    pub async fn is_builtin(&self, id: &str) -> bool {
        self.registry.read().await.is_builtin(id)
    }
}

/// One context per content kind, constructed once at startup.
pub struct ExtensionHost {
    manga: KindContext,
    anime: KindContext,
}

impl ExtensionHost {
    pub fn builder(
        config: &HikariConfig,
        kv: Arc<dyn KeyValueStore>,
        capabilities: Arc<dyn HostCapabilities>,
    ) -> ExtensionHostBuilder {
        ExtensionHostBuilder {
            config: config.clone(),
            kv,
            capabilities,
            http: None,
            builtins: Vec::new(),
        }
    }

    pub fn context(&self, kind: ContentKind) -> &KindContext {
        match kind {
            ContentKind::Manga => &self.manga,
            ContentKind::Anime => &self.anime,
        }
    }

    pub fn manga(&self) -> &KindContext {
        &self.manga
    }

    pub fn anime(&self) -> &KindContext {
        &self.anime
    }

    /// Initialize both kinds concurrently.
    pub async fn initialize(&self) {
        tokio::join!(self.manga.initialize(), self.anime.initialize());
    }
}

pub struct ExtensionHostBuilder {
    config: HikariConfig,
    kv: Arc<dyn KeyValueStore>,
    capabilities: Arc<dyn HostCapabilities>,
    http: Option<reqwest::Client>,
    builtins: Vec<Arc<dyn Source>>,
}

impl ExtensionHostBuilder {
    /// Register a source compiled into the host. It lands in the registry of
    /// its own kind.
    #[must_use]
    pub fn builtin(mut self, source: Arc<dyn Source>) -> Self {
        self.builtins.push(source);
        self
    }

    /// Use this client for repository and bundle downloads instead of one
    /// built from `network` config.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<ExtensionHost> {
        let http = match self.http {
            Some(client) => client,
            None => build_http_client(&self.config.network)?,
        };
        let runtime = Arc::new(WasmRuntime::new(&self.config.sandbox, self.capabilities)?);
        let strict = self.config.extensions.strict;
        if strict {
            warn!("strict extension mode: duplicate ids and unknown ids are errors");
        }

        let make = |kind: ContentKind, default_repos: &[String]| -> Result<KindContext> {
            let store = Arc::new(InstalledExtensionStore::open(kind, Arc::clone(&self.kv), strict)?);
            let loader = SandboxLoader::new(kind, Arc::clone(&store), Arc::clone(&runtime));
            let builtins = self
                .builtins
                .iter()
                .filter(|s| s.kind() == kind)
                .cloned()
                .collect();
            Ok(KindContext {
                kind,
                repos: RepositoryClient::new(kind, Arc::clone(&self.kv), http.clone())?,
                store,
                registry: RwLock::new(SourceRegistry::new(loader, builtins, strict)),
                default_repos: default_repos.to_vec(),
            })
        };

        let repos = &self.config.extensions.default_repos;
        Ok(ExtensionHost {
            manga: make(ContentKind::Manga, &repos.manga)?,
            anime: make(ContentKind::Anime, &repos.anime)?,
        })
    }
}
