//! Error taxonomy for the store core.
//!
//! Local persistence failures are fatal to the calling operation. Remote
//! failures during normal mutations are absorbed into the pending-change
//! queue and never reach the caller; they only surface from explicit
//! session operations (join, manual sync) where the user asked for a
//! remote-dependent action.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The local SQLite layer is unavailable or corrupted. Not retried.
    #[error("local storage failure: {0}")]
    LocalWrite(String),

    /// Network unreachable, timeout, or a sync-backend server error.
    #[error("network failure: {0}")]
    RemoteTransient(String),

    /// The remote record or store does not exist.
    #[error("not found: {0}")]
    RemoteNotFound(String),

    /// Malformed input, rejected before any store write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An operation that needs a tenant was called before create/join.
    #[error("no store session; create or join a store first")]
    NoSession,
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteTransient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RemoteNotFound(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::LocalWrite(e.to_string())
    }
}
