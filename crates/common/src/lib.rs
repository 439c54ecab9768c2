//! Shared plumbing used across the hikari crates: error context helpers and
//! wall-clock timestamps.

pub mod error;
pub mod time;

pub use {
    error::FromMessage,
    time::now_ms,
};
