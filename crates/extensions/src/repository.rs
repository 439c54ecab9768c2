//! Repository client: fetch and validate catalog manifests and raw bundles.
//!
//! A repository serves `GET {url}/index.json`:
//!
//! ```json
//! { "name": "R", "description": "...", "extensions": [
//!     { "id": "a", "name": "A", "version": "1.0", "lang": "en", "nsfw": false,
//!       "iconUrl": "icons/a.png", "bundleUrl": "a.wat" } ] }
//! ```
//!
//! Relative `bundleUrl`s resolve against the repository URL. This module
//! never evaluates what it downloads.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    futures::future::join_all,
    hikari_config::NetworkConfig,
    reqwest::{StatusCode, header::ACCEPT, redirect::Policy},
    serde_json::Value,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    error::{Error, Result},
    formats::detect_format,
    kind::ContentKind,
    kv::{KeyValueStore, load_json, save_json},
    metrics,
    types::{CatalogEntry, RepositoryCatalog, RepositoryRecord},
};

/// File name of the manifest at the root of every repository.
pub const INDEX_FILE: &str = "index.json";

/// Build the HTTP client used for repository and bundle downloads.
pub fn build_http_client(network: &NetworkConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(network.user_agent.clone())
        .redirect(Policy::limited(network.max_redirects));
    if let Some(secs) = network.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| Error::message(format!("failed to build HTTP client: {e}")))
}

/// Normalize a user-supplied repository URL.
///
/// Drops any query or fragment, trims trailing slashes, and reduces a URL
/// that names a manifest file (`.../index.json`) to its directory.
pub fn normalize_repo_url(raw: &str) -> Result<String> {
    let invalid = |reason: &str| Error::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut parsed = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https repositories are supported"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    parsed.set_query(None);
    parsed.set_fragment(None);

    let mut path = parsed.path().trim_end_matches('/').to_string();
    if let Some((base, last)) = path.rsplit_once('/')
        && last.to_ascii_lowercase().ends_with(".json")
    {
        path = base.trim_end_matches('/').to_string();
    }
    parsed.set_path(&path);
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Resolve a catalog `bundleUrl` against its repository URL.
pub fn resolve_bundle_url(repo_url: &str, bundle: &str) -> Result<String> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: bundle.to_string(),
        reason,
    };

    let resolved = match Url::parse(bundle) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(&format!("{repo_url}/")).map_err(|e| invalid(e.to_string()))?;
            base.join(bundle).map_err(|e| invalid(e.to_string()))?
        },
        Err(e) => return Err(invalid(e.to_string())),
    };
    if !matches!(resolved.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "scheme \"{}\" is not allowed for bundles",
            resolved.scheme()
        )));
    }
    Ok(resolved.to_string())
}

/// Validate a parsed index payload into a catalog for `kind`.
///
/// Entries that fail validation, or that declare another content kind, are
/// skipped; the index as a whole fails only when its outer shape is wrong.
pub fn parse_index(url: &str, kind: ContentKind, payload: Value) -> Result<RepositoryCatalog> {
    let malformed = |reason: &str| Error::RepoMalformed {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let format = detect_format(&payload);
    if format.is_foreign() {
        return Err(Error::RepoIncompatible {
            url: url.to_string(),
            format: format.to_string(),
        });
    }

    let Value::Object(mut obj) = payload else {
        return Err(malformed("expected an object with \"name\" and \"extensions\""));
    };
    let name = match obj.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name,
        _ => return Err(malformed("\"name\" must be a non-empty string")),
    };
    let description = match obj.remove("description") {
        Some(Value::String(d)) => Some(d),
        _ => None,
    };
    let Some(Value::Array(raw_entries)) = obj.remove("extensions") else {
        return Err(malformed("\"extensions\" must be an array"));
    };

    let mut seen = HashSet::new();
    let mut extensions = Vec::with_capacity(raw_entries.len());
    for (index, raw) in raw_entries.into_iter().enumerate() {
        match parse_entry(url, kind, raw) {
            Ok(Some(entry)) if seen.insert(entry.id.clone()) => extensions.push(entry),
            Ok(Some(entry)) => {
                warn!(%url, id = %entry.id, "duplicate catalog entry, keeping the first");
            },
            Ok(None) => {},
            Err(reason) => warn!(%url, index, %reason, "skipping malformed catalog entry"),
        }
    }

    Ok(RepositoryCatalog {
        url: url.to_string(),
        name,
        description,
        extensions,
    })
}

fn parse_entry(
    url: &str,
    kind: ContentKind,
    raw: Value,
) -> std::result::Result<Option<CatalogEntry>, String> {
    let mut entry: CatalogEntry = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    entry.id = entry.id.trim().to_string();
    if entry.id.is_empty() {
        return Err("empty id".into());
    }
    if entry.version.trim().is_empty() {
        return Err(format!("{}: empty version", entry.id));
    }
    if entry.bundle_url.trim().is_empty() {
        return Err(format!("{}: empty bundleUrl", entry.id));
    }
    if let Some(declared) = entry.kind
        && declared != kind
    {
        debug!(%url, id = %entry.id, %declared, "catalog entry belongs to another content kind");
        return Ok(None);
    }

    entry.kind = Some(kind);
    if entry.name.trim().is_empty() {
        entry.name = entry.id.clone();
    }
    entry.bundle_url = resolve_bundle_url(url, entry.bundle_url.trim()).map_err(|e| e.to_string())?;
    if let Some(icon) = entry.icon_url.take() {
        entry.icon_url = resolve_bundle_url(url, &icon).ok();
    }
    Ok(Some(entry))
}

/// Fetches catalogs and bundles for one content kind and owns that kind's
/// persisted repository list.
pub struct RepositoryClient {
    kind: ContentKind,
    http: reqwest::Client,
    kv: Arc<dyn KeyValueStore>,
    repos: Mutex<Vec<RepositoryRecord>>,
}

impl RepositoryClient {
    /// Create a client, loading the persisted repository list.
    pub fn new(
        kind: ContentKind,
        kv: Arc<dyn KeyValueStore>,
        http: reqwest::Client,
    ) -> Result<Self> {
        let repos: Vec<RepositoryRecord> = load_json(kv.as_ref(), &kind.repos_key())?;
        debug!(%kind, count = repos.len(), "loaded repositories");
        Ok(Self {
            kind,
            http,
            kv,
            repos: Mutex::new(repos),
        })
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    fn repos(&self) -> MutexGuard<'_, Vec<RepositoryRecord>> {
        self.repos
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the known repositories, in insertion order.
    pub fn get_repos(&self) -> Vec<RepositoryRecord> {
        self.repos().clone()
    }

    /// Add a repository after validating its manifest. Returns the catalog.
    pub async fn add_repo(&self, url: &str) -> Result<RepositoryCatalog> {
        let url = normalize_repo_url(url)?;
        if self.repos().iter().any(|r| r.url == url) {
            return Err(Error::DuplicateRepo { url });
        }

        let catalog = self.fetch_repo_index(&url).await?;

        let mut repos = self.repos();
        if repos.iter().any(|r| r.url == url) {
            return Err(Error::DuplicateRepo { url });
        }
        repos.push(RepositoryRecord {
            url: url.clone(),
            display_name: catalog.name.clone(),
            added_at: hikari_common::now_ms(),
        });
        save_json(self.kv.as_ref(), &self.kind.repos_key(), &*repos)?;
        info!(kind = %self.kind, %url, name = %catalog.name, extensions = catalog.extensions.len(), "added repository");
        Ok(catalog)
    }

    /// Forget a repository. Installed extensions are left untouched.
    /// Returns whether anything was removed.
    pub fn remove_repo(&self, url: &str) -> Result<bool> {
        let url = normalize_repo_url(url).unwrap_or_else(|_| url.trim().to_string());
        let mut repos = self.repos();
        let before = repos.len();
        repos.retain(|r| r.url != url);
        if repos.len() == before {
            debug!(kind = %self.kind, %url, "remove_repo: not present");
            return Ok(false);
        }
        save_json(self.kv.as_ref(), &self.kind.repos_key(), &*repos)?;
        info!(kind = %self.kind, %url, "removed repository");
        Ok(true)
    }

    /// Fetch and validate `{url}/index.json`.
    pub async fn fetch_repo_index(&self, url: &str) -> Result<RepositoryCatalog> {
        let url = normalize_repo_url(url)?;
        let index_url = format!("{url}/{INDEX_FILE}");
        debug!(kind = %self.kind, url = %index_url, "fetching repository index");

        let unreachable = |reason: String| Error::RepoUnreachable {
            url: url.clone(),
            reason,
        };
        let resp = self
            .http
            .get(&index_url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::RepoNotFound { url: index_url });
        }
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }

        let body = resp.text().await.map_err(|e| unreachable(e.to_string()))?;
        let payload: Value = serde_json::from_str(&body).map_err(|e| Error::RepoMalformed {
            url: url.clone(),
            reason: format!("invalid JSON: {e}"),
        })?;
        parse_index(&url, self.kind, payload)
    }

    /// Download a bundle as text. The payload is returned unevaluated.
    pub async fn fetch_extension_bundle(&self, bundle_url: &str) -> Result<String> {
        debug!(kind = %self.kind, url = %bundle_url, "fetching extension bundle");
        let unreachable = |reason: String| Error::BundleUnreachable {
            url: bundle_url.to_string(),
            reason,
        };
        let resp = self
            .http
            .get(bundle_url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }
        resp.text().await.map_err(|e| unreachable(e.to_string()))
    }

    /// Fetch every known repository concurrently and return the catalogs that
    /// succeeded. Failing repositories are logged and omitted.
    pub async fn fetch_all_extensions(&self) -> Vec<RepositoryCatalog> {
        let repos = self.get_repos();
        let fetches = repos.iter().map(|repo| async move {
            let result = self.fetch_repo_index(&repo.url).await;
            (repo, result)
        });

        join_all(fetches)
            .await
            .into_iter()
            .filter_map(|(repo, result)| match result {
                Ok(catalog) => Some(catalog),
                Err(e) => {
                    warn!(kind = %self.kind, url = %repo.url, error = %e, "skipping repository");
                    metrics::record_repo_failure(self.kind);
                    None
                },
            })
            .collect()
    }

    /// Look up one catalog entry in a repository.
    pub async fn find_entry(&self, repo_url: &str, id: &str) -> Result<CatalogEntry> {
        let catalog = self.fetch_repo_index(repo_url).await?;
        catalog
            .extensions
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotInCatalog {
                repo_url: catalog.url,
                id: id.to_string(),
            })
    }

    /// Add `urls` when this kind has no repositories yet. Failures are logged.
    pub async fn seed(&self, urls: &[String]) {
        if urls.is_empty() || !self.repos().is_empty() {
            return;
        }
        for url in urls {
            if let Err(e) = self.add_repo(url).await {
                warn!(kind = %self.kind, %url, error = %e, "failed to add default repository");
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::kv::MemoryStore, serde_json::json};

    fn client(kv: Arc<dyn KeyValueStore>) -> RepositoryClient {
        RepositoryClient::new(ContentKind::Manga, kv, reqwest::Client::new()).unwrap()
    }

    // ── URL handling ────────────────────────────────────────────────────

    #[test]
    fn normalize_trims_trailing_slash() {
        assert_eq!(normalize_repo_url(" https://x/repo/ ").unwrap(), "https://x/repo");
        assert_eq!(normalize_repo_url("https://x/repo//").unwrap(), "https://x/repo");
    }

    #[test]
    fn normalize_strips_manifest_file() {
        assert_eq!(
            normalize_repo_url("https://x/repo/index.json").unwrap(),
            "https://x/repo"
        );
        assert_eq!(
            normalize_repo_url("https://cdn.example.com/ext/INDEX.JSON").unwrap(),
            "https://cdn.example.com/ext"
        );
    }

    #[test]
    fn normalize_drops_query_and_fragment() {
        assert_eq!(
            normalize_repo_url("https://x/repo/index.json?token=abc").unwrap(),
            "https://x/repo"
        );
        assert_eq!(
            normalize_repo_url("https://x/repo/?ref=main#top").unwrap(),
            "https://x/repo"
        );
        assert_eq!(normalize_repo_url("https://x/index.json").unwrap(), "https://x");
    }

    #[test]
    fn normalize_rejects_bad_urls() {
        assert!(matches!(
            normalize_repo_url("ftp://x/repo"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(normalize_repo_url("not a url").is_err());
        assert!(normalize_repo_url("").is_err());
    }

    #[test]
    fn resolve_relative_and_absolute_bundles() {
        assert_eq!(
            resolve_bundle_url("https://x/repo", "a.wat").unwrap(),
            "https://x/repo/a.wat"
        );
        assert_eq!(
            resolve_bundle_url("https://x/repo", "./bundles/a.wat").unwrap(),
            "https://x/repo/bundles/a.wat"
        );
        assert_eq!(
            resolve_bundle_url("https://x/repo", "https://cdn.y/a.wat").unwrap(),
            "https://cdn.y/a.wat"
        );
        assert!(resolve_bundle_url("https://x/repo", "file:///etc/passwd").is_err());
    }

    // ── Index parsing ───────────────────────────────────────────────────

    #[test]
    fn parse_index_fills_defaults_and_resolves() {
        let payload = json!({
            "name": "R",
            "extensions": [
                {"id": "a", "version": "1.0", "lang": "en", "nsfw": false, "bundleUrl": "a.js"}
            ]
        });
        let catalog = parse_index("https://x/repo", ContentKind::Manga, payload).unwrap();
        assert_eq!(catalog.name, "R");
        assert_eq!(catalog.extensions.len(), 1);
        let entry = &catalog.extensions[0];
        assert_eq!(entry.name, "a");
        assert_eq!(entry.bundle_url, "https://x/repo/a.js");
        assert_eq!(entry.kind, Some(ContentKind::Manga));
    }

    #[test]
    fn parse_index_skips_bad_and_foreign_kind_entries() {
        let payload = json!({
            "name": "R",
            "extensions": [
                {"id": "", "version": "1", "bundleUrl": "x.wat"},
                {"id": "nover", "version": "", "bundleUrl": "x.wat"},
                {"id": "anime-only", "version": "1", "bundleUrl": "x.wat", "contentKind": "anime"},
                {"id": "ok", "version": "1", "bundleUrl": "ok.wat"},
                {"id": "ok", "version": "2", "bundleUrl": "ok2.wat"},
                "garbage"
            ]
        });
        let catalog = parse_index("https://x/repo", ContentKind::Manga, payload).unwrap();
        let ids: Vec<_> = catalog.extensions.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["ok"]);
        assert_eq!(catalog.extensions[0].version, "1");
    }

    #[test]
    fn parse_index_requires_name_and_extensions() {
        let no_name = json!({"extensions": []});
        assert!(matches!(
            parse_index("https://x", ContentKind::Manga, no_name),
            Err(Error::RepoMalformed { .. })
        ));
        let no_list = json!({"name": "R", "extensions": {}});
        assert!(matches!(
            parse_index("https://x", ContentKind::Manga, no_list),
            Err(Error::RepoMalformed { .. })
        ));
    }

    #[test]
    fn parse_index_flags_apk_catalog_as_incompatible() {
        let payload = json!([{"name": "Tachiyomi: X", "pkg": "eu.x", "apk": "x.apk", "version": "1.4.1"}]);
        let err = parse_index("https://x", ContentKind::Manga, payload).unwrap_err();
        assert!(matches!(err, Error::RepoIncompatible { .. }));
        assert!(err.to_string().contains("not compatible"));
    }

    // ── HTTP ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn add_repo_persists_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repo/index.json")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"name": "R", "extensions": [
                    {"id": "a", "version": "1.0", "lang": "en", "nsfw": false, "bundleUrl": "a.js"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let repos = client(kv.clone());
        let catalog = repos
            .add_repo(&format!("{}/repo/index.json", server.url()))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(catalog.extensions[0].bundle_url, format!("{}/repo/a.js", server.url()));

        let records = repos.get_repos();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name, "R");
        assert_eq!(records[0].url, format!("{}/repo", server.url()));

        // A fresh client sees the persisted list.
        assert_eq!(client(kv).get_repos(), records);
    }

    #[tokio::test]
    async fn add_repo_rejects_duplicates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repo/index.json")
            .with_status(200)
            .with_body(json!({"name": "R", "extensions": []}).to_string())
            .expect(1)
            .create_async()
            .await;

        let repos = client(Arc::new(MemoryStore::new()));
        let url = format!("{}/repo", server.url());
        repos.add_repo(&url).await.unwrap();
        let err = repos.add_repo(&format!("{url}/")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateRepo { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_index_distinguishes_404_from_other_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/missing/index.json")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/broken/index.json")
            .with_status(503)
            .create_async()
            .await;

        let repos = client(Arc::new(MemoryStore::new()));
        let err = repos
            .fetch_repo_index(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepoNotFound { .. }));

        let err = repos
            .fetch_repo_index(&format!("{}/broken", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepoUnreachable { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn fetch_index_reports_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repo/index.json")
            .with_status(200)
            .with_body("{not valid json}")
            .create_async()
            .await;

        let repos = client(Arc::new(MemoryStore::new()));
        let err = repos
            .fetch_repo_index(&format!("{}/repo", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepoMalformed { .. }));
        assert!(repos.get_repos().is_empty());
    }

    #[tokio::test]
    async fn fetch_bundle_returns_raw_text() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/repo/a.wat")
            .with_status(200)
            .with_body("(module)")
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/repo/gone.wat")
            .with_status(404)
            .create_async()
            .await;

        let repos = client(Arc::new(MemoryStore::new()));
        let code = repos
            .fetch_extension_bundle(&format!("{}/repo/a.wat", server.url()))
            .await
            .unwrap();
        assert_eq!(code, "(module)");

        let err = repos
            .fetch_extension_bundle(&format!("{}/repo/gone.wat", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BundleUnreachable { .. }));
    }

    #[tokio::test]
    async fn remove_repo_only_forgets_the_record() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        save_json(kv.as_ref(), "manga_repos", &vec![RepositoryRecord {
            url: "https://x/repo".into(),
            display_name: "R".into(),
            added_at: 1,
        }])
        .unwrap();

        let repos = client(kv.clone());
        assert!(repos.remove_repo("https://x/repo/").unwrap());
        assert!(!repos.remove_repo("https://x/repo").unwrap());
        assert!(client(kv).get_repos().is_empty());
    }
}
