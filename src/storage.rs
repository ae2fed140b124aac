//! Store session slot using the OS credential store.
//!
//! The browser app kept the tenant identifier in localStorage so it survived
//! IndexedDB schema upgrades. Here the same slot lives in the OS keyring
//! (DPAPI on Windows, Keychain on macOS, Secret Service on Linux), behind a
//! trait so tests can substitute an in-memory store.

use keyring::Entry;
use tracing::{info, warn};

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "enjoy-gifts-pos";

// Credential keys
pub const KEY_STORE_ID: &str = "store_id";
pub const KEY_STORE_NAME: &str = "store_name";
pub const KEY_OWNER_NAME: &str = "owner_name";
pub const KEY_SYNC_URL: &str = "sync_url";
pub const KEY_API_KEY: &str = "sync_api_key";
pub const KEY_ADMIN_PASSWORD_HASH: &str = "admin_password_hash";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_STORE_ID,
    KEY_STORE_NAME,
    KEY_OWNER_NAME,
    KEY_SYNC_URL,
    KEY_API_KEY,
    KEY_ADMIN_PASSWORD_HASH,
];

/// Persistent key-value slot for session credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when the entry does not exist.
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Silently succeeds if the entry does not exist.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Credential store backed by the OS keyring.
#[derive(Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        KeyringStore
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(SERVICE_NAME, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry =
            Entry::new(SERVICE_NAME, key).map_err(|e| Error::LocalWrite(e.to_string()))?;
        entry
            .set_password(value)
            .map_err(|e| Error::LocalWrite(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let entry =
            Entry::new(SERVICE_NAME, key).map_err(|e| Error::LocalWrite(e.to_string()))?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::LocalWrite(e.to_string())),
        }
    }
}

/// Delete every stored credential (factory reset).
pub fn factory_reset(creds: &impl CredentialStore) -> Result<()> {
    info!("performing factory reset - deleting all credentials");
    for key in ALL_KEYS {
        creds.delete(key)?;
    }
    Ok(())
}
