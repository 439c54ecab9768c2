#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    hikari_extensions::{
        ContentKind, FetchRequest, FetchResponse, HostCapabilities, SearchFilter, SearchPage,
        Source, SourceInfo,
    },
    serde_json::{Value, json},
};

// ── Guest modules ───────────────────────────────────────────────────────────

const HEAP_START: u32 = 8192;

/// Builds WebAssembly text for test guests that answer from static JSON.
pub struct GuestWat {
    imports_fetch: bool,
    start_trap: bool,
    pages: u32,
    body: Vec<String>,
    next_offset: u32,
}

impl GuestWat {
    /// A guest whose `meta()` returns `meta`, without a `search` export.
    pub fn bare(meta: Value) -> Self {
        let mut guest = Self {
            imports_fetch: false,
            start_trap: false,
            pages: 4,
            body: Vec::new(),
            next_offset: 16,
        };
        let (off, len) = guest.data(&meta.to_string());
        guest.body.push(format!(
            "(func (export \"meta\") (result i64) i64.const {})",
            pack(off, len)
        ));
        guest
    }

    /// A guest with `meta()` and a `search` returning an empty page.
    pub fn new(meta: Value) -> Self {
        Self::bare(meta).returning("search", &json!({"results": [], "hasNextPage": false}))
    }

    pub fn named(id: &str, name: &str, version: &str) -> Self {
        Self::new(json!({
            "id": id,
            "name": name,
            "version": version,
            "baseUrl": format!("https://{id}.example"),
            "lang": "en"
        }))
    }

    fn data(&mut self, json: &str) -> (u32, u32) {
        let off = self.next_offset;
        let len = json.len() as u32;
        self.body
            .push(format!("(data (i32.const {off}) \"{}\")", escape(json)));
        self.next_offset = (off + len + 16) & !7;
        assert!(self.next_offset < HEAP_START, "fixture data overflows the heap");
        (off, len)
    }

    /// Export `name` returning `value` regardless of input.
    pub fn returning(mut self, name: &str, value: &Value) -> Self {
        let (off, len) = self.data(&value.to_string());
        self.body.push(format!(
            "(func (export \"{name}\") (param i32 i32) (result i64) i64.const {})",
            pack(off, len)
        ));
        self
    }

    /// Export `name` returning its own input arguments.
    pub fn echoing(mut self, name: &str) -> Self {
        self.body.push(format!(
            "(func (export \"{name}\") (param $p i32) (param $l i32) (result i64)
               local.get $p i64.extend_i32_u i64.const 32 i64.shl
               local.get $l i64.extend_i32_u i64.or)"
        ));
        self
    }

    /// Export `name` that never returns.
    pub fn spinning(mut self, name: &str) -> Self {
        self.body.push(format!(
            "(func (export \"{name}\") (param i32 i32) (result i64) (loop $spin (br $spin)) i64.const 0)"
        ));
        self
    }

    /// Export `name` that performs `request` through `host.fetch` and
    /// returns the host's answer.
    pub fn fetching(mut self, name: &str, request: &Value) -> Self {
        self.imports_fetch = true;
        let (off, len) = self.data(&request.to_string());
        self.body.push(format!(
            "(func (export \"{name}\") (param i32 i32) (result i64) (call $fetch (i32.const {off}) (i32.const {len})))"
        ));
        self
    }

    /// Trap while the module is being instantiated.
    pub fn trapping_at_start(mut self) -> Self {
        self.start_trap = true;
        self
    }

    pub fn pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    pub fn build(&self) -> String {
        let mut wat = String::from("(module\n");
        if self.imports_fetch {
            wat.push_str("  (import \"host\" \"fetch\" (func $fetch (param i32 i32) (result i64)))\n");
        }
        wat.push_str(&format!("  (memory (export \"memory\") {})\n", self.pages));
        wat.push_str(&format!("  (global $heap (mut i32) (i32.const {HEAP_START}))\n"));
        wat.push_str(
            "  (func (export \"alloc\") (param $len i32) (result i32) (local $ptr i32)
     global.get $heap local.set $ptr
     global.get $heap local.get $len i32.add global.set $heap
     local.get $ptr)\n",
        );
        if self.start_trap {
            wat.push_str("  (func $boom unreachable)\n  (start $boom)\n");
        }
        for item in &self.body {
            wat.push_str("  ");
            wat.push_str(item);
            wat.push('\n');
        }
        wat.push(')');
        wat
    }
}

fn pack(off: u32, len: u32) -> i64 {
    (i64::from(off) << 32) | i64::from(len)
}

fn escape(json: &str) -> String {
    json.bytes()
        .map(|b| match b {
            b'"' | b'\\' => format!("\\{b:02x}"),
            0x20..=0x7e => (b as char).to_string(),
            _ => format!("\\{b:02x}"),
        })
        .collect()
}

// ── Capabilities ────────────────────────────────────────────────────────────

/// Records every request and answers with a fixed response.
#[derive(Default)]
pub struct RecordingCapabilities {
    pub requests: Mutex<Vec<FetchRequest>>,
    pub reply: Option<FetchResponse>,
}

impl RecordingCapabilities {
    pub fn answering(reply: FetchResponse) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Some(reply),
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }
}

#[async_trait]
impl HostCapabilities for RecordingCapabilities {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, String> {
        self.requests.lock().unwrap().push(request);
        self.reply.clone().ok_or_else(|| "offline".to_string())
    }
}

// ── Logs ────────────────────────────────────────────────────────────────────

/// Collects formatted log output for the current thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route `warn!` and above on this thread into the buffer until the guard
    /// is dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ── Built-in sources ────────────────────────────────────────────────────────

pub struct BuiltinSource {
    info: SourceInfo,
    kind: ContentKind,
}

pub fn builtin(id: &str, kind: ContentKind) -> Arc<dyn Source> {
    Arc::new(BuiltinSource {
        info: SourceInfo {
            id: id.into(),
            name: format!("Built-in {id}"),
            version: "0".into(),
            base_url: String::new(),
            lang: "en".into(),
            nsfw: false,
        },
        kind,
    })
}

#[async_trait]
impl Source for BuiltinSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn kind(&self) -> ContentKind {
        self.kind
    }

    async fn search(&self, filter: &SearchFilter) -> hikari_extensions::Result<SearchPage> {
        Ok(SearchPage {
            results: vec![json!({"title": filter.query})],
            has_next_page: false,
        })
    }
}
