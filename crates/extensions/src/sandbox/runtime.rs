//! WebAssembly runtime that turns a bundle into a live [`Source`].
//!
//! Guests speak JSON over linear memory. A guest exports:
//!
//! - `memory`
//! - `alloc(len: i32) -> i32`, used by the host to place inputs
//! - `meta() -> i64`, returning `{id, name, version, baseUrl, lang, nsfw}`
//! - `search(ptr: i32, len: i32) -> i64`
//! - optionally the kind's `details`/`children`/`content` exports, with the
//!   same signature as `search`
//!
//! Inputs are a JSON array of positional arguments. Every `i64` result packs
//! `(ptr << 32) | len` of a UTF-8 JSON document in guest memory; an object
//! with a string `error` field is a guest-reported failure.
//!
//! The only import a guest may declare is `host.fetch(ptr, len) -> i64`,
//! which forwards a [`FetchRequest`] to the injected [`HostCapabilities`]
//! and answers with a [`FetchResponse`] (or `{"error": ...}`) allocated in
//! guest memory.

use std::sync::Arc;

use {
    anyhow::{anyhow, bail},
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    hikari_config::SandboxConfig,
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::sync::Mutex,
    tracing::{debug, warn},
    wasmtime::{
        AsContext, AsContextMut, Caller, Config, Engine, Extern, Instance, Linker, Memory, Module,
        Store, StoreLimits, StoreLimitsBuilder, TypedFunc,
    },
};

use crate::{
    error::{Error, Result},
    kind::ContentKind,
    sandbox::capabilities::{FetchRequest, HostCapabilities},
    source::Source,
    types::{SearchFilter, SearchPage, SourceInfo},
};

pub const HOST_MODULE: &str = "host";
pub const FETCH_IMPORT: &str = "fetch";

const WASM_MAGIC: &[u8] = b"\0asm";

type GuestFn = TypedFunc<(i32, i32), i64>;

/// Per-store data. The capability handle is everything a guest can reach.
struct GuestState {
    capabilities: Arc<dyn HostCapabilities>,
    limits: StoreLimits,
    extension_id: String,
}

/// Compiles and instantiates bundles. One runtime is shared by every loader.
pub struct WasmRuntime {
    engine: Engine,
    linker: Linker<GuestState>,
    limits: SandboxConfig,
    capabilities: Arc<dyn HostCapabilities>,
}

impl WasmRuntime {
    pub fn new(limits: &SandboxConfig, capabilities: Arc<dyn HostCapabilities>) -> Result<Self> {
        let mut config = Config::new();
        config.async_support(true);
        config.consume_fuel(true);
        let engine = Engine::new(&config)
            .map_err(|e| Error::message(format!("failed to create wasm engine: {e:#}")))?;

        let mut linker = Linker::new(&engine);
        linker
            .func_wrap_async(
                HOST_MODULE,
                FETCH_IMPORT,
                |caller: Caller<'_, GuestState>, (ptr, len): (i32, i32)| {
                    Box::new(host_fetch(caller, ptr, len))
                },
            )
            .map_err(|e| Error::message(format!("failed to link host.fetch: {e:#}")))?;

        Ok(Self {
            engine,
            linker,
            limits: limits.clone(),
            capabilities,
        })
    }

    /// Evaluate `code` as the bundle of `expected_id`.
    ///
    /// The returned source always carries `expected_id`, whatever the guest
    /// declares about itself.
    pub async fn load(&self, kind: ContentKind, expected_id: &str, code: &str) -> Result<WasmSource> {
        let failed = |reason: String| Error::BundleExecutionFailed {
            id: expected_id.to_string(),
            reason,
        };
        let invalid = |reason: String| Error::BundleInvalidShape {
            id: expected_id.to_string(),
            reason,
        };

        let bytes = decode_bundle(expected_id, code)?;
        let module = Module::new(&self.engine, &bytes).map_err(|e| failed(format!("{e:#}")))?;
        check_imports(&module).map_err(invalid)?;
        let pre = self
            .linker
            .instantiate_pre(&module)
            .map_err(|e| invalid(format!("{e:#}")))?;

        let mut store = Store::new(&self.engine, GuestState {
            capabilities: Arc::clone(&self.capabilities),
            limits: StoreLimitsBuilder::new()
                .memory_size(self.limits.max_memory_bytes)
                .build(),
            extension_id: expected_id.to_string(),
        });
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.limits.fuel_per_call)
            .map_err(|e| failed(format!("{e:#}")))?;

        let instance = pre
            .instantiate_async(&mut store)
            .await
            .map_err(|e| failed(format!("{e:#}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| invalid("missing export \"memory\"".into()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| invalid(format!("export \"alloc\": {e:#}")))?;
        let meta = instance
            .get_typed_func::<(), i64>(&mut store, "meta")
            .map_err(|e| invalid(format!("export \"meta\": {e:#}")))?;
        let search = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "search")
            .map_err(|e| invalid(format!("export \"search\": {e:#}")))?;

        let methods = kind.methods();
        let exports = GuestExports {
            search,
            details: optional_export(&instance, &mut store, expected_id, methods.details),
            children: optional_export(&instance, &mut store, expected_id, methods.children),
            content: optional_export(&instance, &mut store, expected_id, methods.content),
        };

        let mut guest = GuestInstance {
            store,
            memory,
            alloc,
            fuel_per_call: self.limits.fuel_per_call,
        };
        let raw = guest
            .call_meta(meta)
            .await
            .map_err(|e| failed(format!("meta(): {e:#}")))?;
        let declared = parse_output(&raw).map_err(|reason| failed(format!("meta(): {reason}")))?;
        let declared: GuestMeta = serde_json::from_value(declared)
            .map_err(|e| invalid(format!("meta() returned an unexpected shape: {e}")))?;
        let info = declared.reconcile(expected_id);

        debug!(%kind, id = %info.id, version = %info.version, "bundle evaluated");
        Ok(WasmSource {
            kind,
            info,
            exports,
            guest: Mutex::new(guest),
        })
    }
}

/// Turn a stored payload into module bytes: WebAssembly text is used as is,
/// anything else must be base64 of a binary module.
pub fn decode_bundle(id: &str, code: &str) -> Result<Vec<u8>> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(Error::BundleEmpty { id: id.to_string() });
    }
    if trimmed.starts_with('(') || trimmed.starts_with(";;") {
        return Ok(trimmed.as_bytes().to_vec());
    }

    let invalid = |reason: String| Error::BundleInvalidShape {
        id: id.to_string(),
        reason,
    };
    let compact: String = trimmed
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| invalid(format!("payload is neither WebAssembly text nor base64: {e}")))?;
    if !bytes.starts_with(WASM_MAGIC) {
        return Err(invalid("decoded payload is not a WebAssembly module".into()));
    }
    Ok(bytes)
}

fn check_imports(module: &Module) -> std::result::Result<(), String> {
    for import in module.imports() {
        if (import.module(), import.name()) != (HOST_MODULE, FETCH_IMPORT) {
            return Err(format!(
                "import {}.{} is not provided by the host",
                import.module(),
                import.name()
            ));
        }
    }
    Ok(())
}

fn optional_export(
    instance: &Instance,
    store: &mut Store<GuestState>,
    id: &str,
    name: &str,
) -> Option<GuestFn> {
    let Some(func) = instance.get_func(&mut *store, name) else {
        warn!(%id, export = name, "bundle does not export this method, calls to it will fail");
        return None;
    };
    match func.typed::<(i32, i32), i64>(&*store) {
        Ok(typed) => Some(typed),
        Err(e) => {
            warn!(%id, export = name, error = %e, "ignoring export with unexpected signature");
            None
        },
    }
}

// ── Guest memory ────────────────────────────────────────────────────────────

fn pack(ptr: i32, len: i32) -> i64 {
    (i64::from(ptr as u32) << 32) | i64::from(len as u32)
}

fn unpack(packed: i64) -> (u32, u32) {
    (((packed as u64) >> 32) as u32, packed as u32)
}

fn read_guest(store: impl AsContext, memory: Memory, ptr: u32, len: u32) -> wasmtime::Result<Vec<u8>> {
    let (start, len) = (ptr as usize, len as usize);
    if start
        .checked_add(len)
        .is_none_or(|end| end > memory.data_size(&store))
    {
        bail!("guest buffer {start}+{len} lies outside linear memory");
    }
    let mut buf = vec![0; len];
    memory.read(&store, start, &mut buf)?;
    Ok(buf)
}

/// Copy `bytes` into memory obtained from the guest's allocator.
async fn write_guest(
    mut store: impl AsContextMut<Data = GuestState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    bytes: &[u8],
) -> wasmtime::Result<(i32, i32)> {
    let len = i32::try_from(bytes.len())?;
    let ptr = alloc.call_async(&mut store, len).await?;
    memory.write(&mut store, ptr as u32 as usize, bytes)?;
    Ok((ptr, len))
}

/// Decode a guest result document, surfacing `{"error": "..."}`.
fn parse_output(raw: &[u8]) -> std::result::Result<Value, String> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| format!("guest returned invalid JSON: {e}"))?;
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(message.to_string());
    }
    Ok(value)
}

async fn host_fetch(mut caller: Caller<'_, GuestState>, ptr: i32, len: i32) -> wasmtime::Result<i64> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("guest does not export memory"))?;
    let alloc = caller
        .get_export("alloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| anyhow!("guest does not export alloc"))?
        .typed::<i32, i32>(&caller)?;

    let raw = read_guest(&caller, memory, ptr as u32, len as u32)?;
    let capabilities = Arc::clone(&caller.data().capabilities);

    let reply = match serde_json::from_slice::<FetchRequest>(&raw) {
        Ok(request) => {
            debug!(extension = %caller.data().extension_id, url = %request.url, "host.fetch");
            match capabilities.fetch(request).await {
                Ok(response) => serde_json::to_vec(&response)?,
                Err(e) => serde_json::to_vec(&json!({ "error": e }))?,
            }
        },
        Err(e) => serde_json::to_vec(&json!({ "error": format!("invalid fetch request: {e}") }))?,
    };

    let (ptr, len) = write_guest(&mut caller, memory, alloc, &reply).await?;
    Ok(pack(ptr, len))
}

// ── Guest instance ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestMeta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    lang: String,
    #[serde(default)]
    nsfw: bool,
}

impl GuestMeta {
    /// The catalog id always wins over whatever the guest declares.
    fn reconcile(self, expected_id: &str) -> SourceInfo {
        if let Some(declared) = self.id.as_deref()
            && declared != expected_id
        {
            warn!(
                expected = %expected_id,
                declared = %declared,
                "source declares a different id, using the catalog id"
            );
        }
        SourceInfo {
            id: expected_id.to_string(),
            name: if self.name.is_empty() {
                expected_id.to_string()
            } else {
                self.name
            },
            version: self.version,
            base_url: self.base_url,
            lang: self.lang,
            nsfw: self.nsfw,
        }
    }
}

struct GuestExports {
    search: GuestFn,
    details: Option<GuestFn>,
    children: Option<GuestFn>,
    content: Option<GuestFn>,
}

struct GuestInstance {
    store: Store<GuestState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    fuel_per_call: u64,
}

impl GuestInstance {
    async fn call_meta(&mut self, meta: TypedFunc<(), i64>) -> wasmtime::Result<Vec<u8>> {
        self.store.set_fuel(self.fuel_per_call)?;
        let packed = meta.call_async(&mut self.store, ()).await?;
        self.read_packed(packed)
    }

    async fn call_json(&mut self, func: GuestFn, args: &Value) -> wasmtime::Result<Vec<u8>> {
        self.store.set_fuel(self.fuel_per_call)?;
        let input = serde_json::to_vec(args)?;
        let (ptr, len) = write_guest(&mut self.store, self.memory, self.alloc.clone(), &input).await?;
        let packed = func.call_async(&mut self.store, (ptr, len)).await?;
        self.read_packed(packed)
    }

    fn read_packed(&self, packed: i64) -> wasmtime::Result<Vec<u8>> {
        let (ptr, len) = unpack(packed);
        read_guest(&self.store, self.memory, ptr, len)
    }
}

/// A source backed by a sandboxed guest. Calls into one guest are
/// serialised; a trap fails only the call that caused it.
pub struct WasmSource {
    kind: ContentKind,
    info: SourceInfo,
    exports: GuestExports,
    guest: Mutex<GuestInstance>,
}

impl std::fmt::Debug for WasmSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmSource")
            .field("id", &self.info.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl WasmSource {
    async fn invoke(&self, method: &str, func: Option<GuestFn>, args: Value) -> Result<Value> {
        let Some(func) = func else {
            return Err(self.unsupported(method));
        };
        let raw = {
            let mut guest = self.guest.lock().await;
            guest
                .call_json(func, &args)
                .await
                .map_err(|e| Error::source_call(&self.info.id, method, format!("{e:#}")))?
        };
        parse_output(&raw).map_err(|reason| Error::source_call(&self.info.id, method, reason))
    }
}

#[async_trait]
impl Source for WasmSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn kind(&self) -> ContentKind {
        self.kind
    }

    async fn search(&self, filter: &SearchFilter) -> Result<SearchPage> {
        let value = self
            .invoke("search", Some(self.exports.search.clone()), json!([filter]))
            .await?;
        serde_json::from_value(value).map_err(|e| {
            Error::source_call(&self.info.id, "search", format!("unexpected result shape: {e}"))
        })
    }

    async fn details(&self, id: &str) -> Result<Value> {
        self.invoke(self.kind.methods().details, self.exports.details.clone(), json!([id]))
            .await
    }

    async fn children(&self, parent_id: &str) -> Result<Value> {
        self.invoke(self.kind.methods().children, self.exports.children.clone(), json!([parent_id]))
            .await
    }

    async fn content(&self, child_id: &str, server: Option<&str>) -> Result<Value> {
        let args = if self.kind.content_takes_server() {
            json!([child_id, server])
        } else {
            json!([child_id])
        };
        self.invoke(self.kind.methods().content, self.exports.content.clone(), args)
            .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trips_high_addresses() {
        let packed = pack(0x7fff_0000, 12);
        assert_eq!(unpack(packed), (0x7fff_0000, 12));
        assert_eq!(unpack(pack(-8, 3)), (0xffff_fff8, 3));
    }

    #[test]
    fn decode_accepts_text_and_base64() {
        assert_eq!(decode_bundle("a", "  (module)\n").unwrap(), b"(module)");
        let encoded = STANDARD.encode(b"\0asm\x01\0\0\0");
        let wrapped = format!("{}\n{}", &encoded[..4], &encoded[4..]);
        assert_eq!(decode_bundle("a", &wrapped).unwrap(), b"\0asm\x01\0\0\0");
    }

    #[test]
    fn decode_rejects_empty_and_foreign_payloads() {
        assert!(matches!(decode_bundle("a", " \n"), Err(Error::BundleEmpty { .. })));
        assert!(matches!(
            decode_bundle("a", "return { search() {} }"),
            Err(Error::BundleInvalidShape { .. })
        ));
        let not_wasm = STANDARD.encode(b"hello world");
        assert!(matches!(
            decode_bundle("a", &not_wasm),
            Err(Error::BundleInvalidShape { .. })
        ));
    }

    #[test]
    fn guest_errors_are_surfaced() {
        assert_eq!(parse_output(br#"{"error":"boom"}"#).unwrap_err(), "boom");
        assert!(parse_output(b"not json").is_err());
        assert_eq!(parse_output(br#"[1]"#).unwrap(), json!([1]));
        // A non-string error field is ordinary data.
        assert!(parse_output(br#"{"error":3}"#).is_ok());
    }

    #[test]
    fn only_host_fetch_may_be_imported() {
        let engine = Engine::default();
        let ok = Module::new(
            &engine,
            r#"(module (import "host" "fetch" (func (param i32 i32) (result i64))))"#,
        )
        .unwrap();
        assert!(check_imports(&ok).is_ok());

        let wasi = Module::new(
            &engine,
            r#"(module (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32))))"#,
        )
        .unwrap();
        let err = check_imports(&wasi).unwrap_err();
        assert!(err.contains("wasi_snapshot_preview1.fd_write"));
    }

    #[test]
    fn guest_meta_is_reconciled_to_catalog_id() {
        let meta: GuestMeta =
            serde_json::from_value(json!({"id": "other", "version": "1.0", "baseUrl": "https://b"}))
                .unwrap();
        let info = meta.reconcile("a");
        assert_eq!(info.id, "a");
        assert_eq!(info.name, "a");
        assert_eq!(info.base_url, "https://b");
    }
}
