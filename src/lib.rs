//! Enjoy The Gifts - offline-first retail store core.
//!
//! Local SQLite is the source of truth for reads and the first stop for
//! every mutation; remote writes against the hosted sync backend are
//! opportunistic. Changes that cannot reach the backend are queued in a
//! durable pending-change log and replayed when connectivity returns, so a
//! store keeps working with no network at all.
//!
//! The embedding shell (desktop or web view) drives the [`sync::SyncEngine`]
//! and renders its results; nothing in this crate touches a UI.

use serde_json::Value;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod admin;
pub mod api;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod reports;
pub mod sales;
pub mod session;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use sync::{DrainSummary, SyncEngine, SyncState};

/// Initialize structured logging (console + rolling file).
///
/// Call once at process start, before any engine work.
pub fn init_logging(log_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,enjoy_gifts_pos=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "store");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Dropping the guard flushes buffered logs; the appender must outlive
    // the process, so it is leaked deliberately.
    std::mem::forget(guard);

    info!("Starting Enjoy The Gifts core v{}", env!("CARGO_PKG_VERSION"));
}

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_i64(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}
