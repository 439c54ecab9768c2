//! Counter names recorded when the `metrics` feature is enabled.

use crate::kind::ContentKind;

/// Extension load attempts, labelled by `kind` and `outcome` (`ok`/`failed`).
pub const EXTENSION_LOADS_TOTAL: &str = "hikari_extension_loads_total";
/// Repositories skipped by an aggregate catalog fetch, labelled by `kind`.
pub const REPOSITORY_FETCH_FAILURES_TOTAL: &str = "hikari_repository_fetch_failures_total";

pub(crate) fn record_load(kind: ContentKind, ok: bool) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(
        EXTENSION_LOADS_TOTAL,
        "kind" => kind.as_str(),
        "outcome" => if ok { "ok" } else { "failed" }
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (kind, ok);
}

pub(crate) fn record_repo_failure(kind: ContentKind) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(REPOSITORY_FETCH_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}
