//! Durable record of installed extensions for one content kind.
//!
//! Records are kept in memory and written through to the key-value store on
//! every mutation, as a single JSON object mapping id to record under
//! `{kind}_extensions`.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    kind::ContentKind,
    kv::{KeyValueStore, load_json, save_json},
    types::{CatalogEntry, InstalledExtensionRecord},
};

type Records = BTreeMap<String, InstalledExtensionRecord>;

pub struct InstalledExtensionStore {
    kind: ContentKind,
    kv: Arc<dyn KeyValueStore>,
    strict: bool,
    records: Mutex<Records>,
}

impl InstalledExtensionStore {
    /// Open the store, loading whatever is persisted for `kind`.
    pub fn open(kind: ContentKind, kv: Arc<dyn KeyValueStore>, strict: bool) -> Result<Self> {
        let records: Records = load_json(kv.as_ref(), &kind.extensions_key())?;
        debug!(%kind, count = records.len(), "loaded installed extensions");
        Ok(Self {
            kind,
            kv,
            strict,
            records: Mutex::new(records),
        })
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to a copy of the records, persist the copy, then commit it.
    /// Nothing changes in memory if persisting fails.
    fn mutate<R>(&self, f: impl FnOnce(&mut Records) -> R) -> Result<R> {
        let mut guard = self.records();
        let mut next = guard.clone();
        let out = f(&mut next);
        save_json(self.kv.as_ref(), &self.kind.extensions_key(), &next)?;
        *guard = next;
        Ok(out)
    }

    fn missing(&self, id: &str, op: &str) -> Result<()> {
        if self.strict {
            return Err(Error::NotFound {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        debug!(kind = %self.kind, %id, op, "extension not installed, ignoring");
        Ok(())
    }

    /// Insert a new enabled record. Returns `false`, leaving the existing
    /// record untouched, when `entry.id` is already installed.
    pub fn install(&self, entry: &CatalogEntry, repo_url: &str, code: &str) -> Result<bool> {
        if self.records().contains_key(&entry.id) {
            warn!(kind = %self.kind, id = %entry.id, "already installed, not overwriting");
            return Ok(false);
        }
        let record = InstalledExtensionRecord {
            id: entry.id.clone(),
            name: if entry.name.is_empty() {
                entry.id.clone()
            } else {
                entry.name.clone()
            },
            version: entry.version.clone(),
            lang: entry.lang.clone(),
            nsfw: entry.nsfw,
            icon_url: entry.icon_url.clone(),
            repo_url: repo_url.to_string(),
            code: code.to_string(),
            enabled: true,
            installed_at: hikari_common::now_ms(),
        };
        let inserted = self.mutate(|records| {
            if records.contains_key(&record.id) {
                return false;
            }
            records.insert(record.id.clone(), record);
            true
        })?;
        if inserted {
            info!(kind = %self.kind, id = %entry.id, version = %entry.version, "installed extension");
        }
        Ok(inserted)
    }

    /// Remove a record. Returns whether one existed.
    pub fn uninstall(&self, id: &str) -> Result<bool> {
        if !self.records().contains_key(id) {
            self.missing(id, "uninstall")?;
            return Ok(false);
        }
        self.mutate(|records| records.remove(id))?;
        info!(kind = %self.kind, %id, "uninstalled extension");
        Ok(true)
    }

    /// Flip the enabled flag. Returns the new state, or `None` for an
    /// unknown id.
    pub fn toggle(&self, id: &str) -> Result<Option<bool>> {
        let Some(current) = self.get(id).map(|r| r.enabled) else {
            self.missing(id, "toggle")?;
            return Ok(None);
        };
        self.set_enabled(id, !current)?;
        Ok(Some(!current))
    }

    /// Returns whether the id is installed.
    pub fn enable(&self, id: &str) -> Result<bool> {
        self.set_enabled_checked(id, true, "enable")
    }

    /// Returns whether the id is installed.
    pub fn disable(&self, id: &str) -> Result<bool> {
        self.set_enabled_checked(id, false, "disable")
    }

    fn set_enabled_checked(&self, id: &str, enabled: bool, op: &str) -> Result<bool> {
        if !self.records().contains_key(id) {
            self.missing(id, op)?;
            return Ok(false);
        }
        self.set_enabled(id, enabled)?;
        Ok(true)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.mutate(|records| {
            if let Some(record) = records.get_mut(id) {
                record.enabled = enabled;
            }
        })?;
        info!(kind = %self.kind, %id, enabled, "extension state changed");
        Ok(())
    }

    /// Replace version, code and icon of an existing record. The enabled
    /// flag is preserved. Returns whether a record was updated.
    pub fn update(&self, entry: &CatalogEntry, code: &str) -> Result<bool> {
        if !self.records().contains_key(&entry.id) {
            self.missing(&entry.id, "update")?;
            return Ok(false);
        }
        let from = self.mutate(|records| {
            records.get_mut(&entry.id).map(|record| {
                let from = std::mem::replace(&mut record.version, entry.version.clone());
                record.code = code.to_string();
                record.icon_url = entry.icon_url.clone();
                from
            })
        })?;
        if let Some(from) = from {
            info!(kind = %self.kind, id = %entry.id, %from, to = %entry.version, "updated extension");
        }
        Ok(true)
    }

    /// Whether `candidate` is newer than the installed version of `id`.
    /// Unknown ids never have updates.
    pub fn has_update(&self, id: &str, candidate: &str) -> bool {
        self.records()
            .get(id)
            .is_some_and(|r| compare_versions(candidate, &r.version) == Ordering::Greater)
    }

    pub fn get_all(&self) -> Vec<InstalledExtensionRecord> {
        self.records().values().cloned().collect()
    }

    pub fn get_enabled(&self) -> Vec<InstalledExtensionRecord> {
        self.records()
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<InstalledExtensionRecord> {
        self.records().get(id).cloned()
    }
}

/// Compare dotted versions component-wise as integers. Missing trailing
/// components count as 0; a component that is not a number counts as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::kv::MemoryStore};

    fn entry(id: &str, version: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.into(),
            name: id.to_uppercase(),
            version: version.into(),
            lang: "en".into(),
            nsfw: false,
            icon_url: None,
            bundle_url: format!("https://x/repo/{id}.wat"),
            description: None,
            kind: Some(ContentKind::Manga),
        }
    }

    fn open(kv: &Arc<dyn KeyValueStore>, strict: bool) -> InstalledExtensionStore {
        InstalledExtensionStore::open(ContentKind::Manga, kv.clone(), strict).unwrap()
    }

    fn memory() -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn install_then_get_round_trips_code() {
        let kv = memory();
        let store = open(&kv, false);
        let code = "(module (func (export \"meta\")))\n  ";
        assert!(store.install(&entry("a", "1.0"), "https://x/repo", code).unwrap());

        let record = store.get("a").unwrap();
        assert!(record.enabled);
        assert_eq!(record.code, code);
        assert_eq!(record.name, "A");
        assert_eq!(record.repo_url, "https://x/repo");
        assert!(record.installed_at > 0);
    }

    #[test]
    fn install_does_not_overwrite() {
        let kv = memory();
        let store = open(&kv, false);
        store.install(&entry("a", "1.0"), "r", "old").unwrap();
        assert!(!store.install(&entry("a", "2.0"), "r", "new").unwrap());
        let record = store.get("a").unwrap();
        assert_eq!(record.version, "1.0");
        assert_eq!(record.code, "old");
    }

    #[test]
    fn mutations_persist_immediately() {
        let kv = memory();
        let store = open(&kv, false);
        store.install(&entry("a", "1.0"), "r", "code").unwrap();
        store.install(&entry("b", "1.0"), "r", "code").unwrap();
        store.disable("a").unwrap();
        store.uninstall("b").unwrap();

        let reopened = open(&kv, false);
        let all = reopened.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a");
        assert!(!all[0].enabled);
        assert!(reopened.get_enabled().is_empty());
    }

    #[test]
    fn toggle_enable_disable() {
        let kv = memory();
        let store = open(&kv, false);
        store.install(&entry("a", "1.0"), "r", "code").unwrap();
        assert_eq!(store.toggle("a").unwrap(), Some(false));
        assert_eq!(store.toggle("a").unwrap(), Some(true));
        assert!(store.disable("a").unwrap());
        assert!(!store.get("a").unwrap().enabled);
        assert!(store.enable("a").unwrap());
        assert!(store.get("a").unwrap().enabled);
    }

    #[test]
    fn unknown_ids_are_noops_when_lenient() {
        let store = open(&memory(), false);
        assert!(!store.uninstall("ghost").unwrap());
        assert_eq!(store.toggle("ghost").unwrap(), None);
        assert!(!store.enable("ghost").unwrap());
        assert!(!store.disable("ghost").unwrap());
        assert!(!store.update(&entry("ghost", "2.0"), "x").unwrap());
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn unknown_ids_fail_when_strict() {
        let store = open(&memory(), true);
        assert!(matches!(store.uninstall("ghost"), Err(Error::NotFound { .. })));
        assert!(matches!(store.toggle("ghost"), Err(Error::NotFound { .. })));
        assert!(matches!(store.disable("ghost"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn update_replaces_code_but_keeps_enabled() {
        let kv = memory();
        let store = open(&kv, false);
        store.install(&entry("a", "1.0"), "r", "v1").unwrap();
        store.disable("a").unwrap();

        let mut newer = entry("a", "1.1");
        newer.icon_url = Some("https://x/repo/a.png".into());
        assert!(store.update(&newer, "v2").unwrap());

        let record = store.get("a").unwrap();
        assert_eq!(record.version, "1.1");
        assert_eq!(record.code, "v2");
        assert_eq!(record.icon_url.as_deref(), Some("https://x/repo/a.png"));
        assert!(!record.enabled);
        assert_eq!(open(&kv, false).get("a").unwrap().code, "v2");
    }

    #[test]
    fn has_update_orders_numerically() {
        let store = open(&memory(), false);
        store.install(&entry("a", "1.1.9"), "r", "x").unwrap();
        store.install(&entry("b", "1.9.9"), "r", "x").unwrap();
        assert!(store.has_update("a", "1.2.0"));
        assert!(!store.has_update("a", "1.1.9"));
        assert!(store.has_update("b", "2.0"));
        assert!(!store.has_update("missing", "9.9"));
    }

    #[test]
    fn compare_versions_pads_missing_components() {
        assert_eq!(compare_versions("1.0", "1"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.1", "1"), Ordering::Greater);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("0.9", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn failed_persist_leaves_memory_unchanged() {
        struct ReadOnly;
        impl KeyValueStore for ReadOnly {
            fn get(&self, _key: &str) -> Result<Option<String>> {
                Ok(None)
            }

            fn set(&self, key: &str, _value: &str) -> Result<()> {
                Err(Error::storage(key, "read-only"))
            }
        }

        let store = InstalledExtensionStore::open(ContentKind::Anime, Arc::new(ReadOnly), false).unwrap();
        assert!(store.install(&entry("a", "1.0"), "r", "x").is_err());
        assert!(store.get("a").is_none());
    }
}
