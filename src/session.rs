//! Store session: the tenant identity that scopes every remote query.
//!
//! The identifier is persisted in the credential slot (not the versioned
//! SQLite store) so it survives schema migrations, and it is the only way to
//! rejoin a store from another device - it must be displayable and copyable.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::storage::{
    CredentialStore, KEY_ADMIN_PASSWORD_HASH, KEY_OWNER_NAME, KEY_STORE_ID, KEY_STORE_NAME,
};
use crate::value_str;

const MIN_ADMIN_PASSWORD_LEN: usize = 6;

/// Generate a fresh tenant identifier: `store_<unix-ms>_<9-char-suffix>`.
pub fn new_store_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("store_{millis}_{suffix}")
}

/// A shareable join code bundling the store id with optional backend
/// coordinates, so one copy/paste moves a store between devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareCode {
    pub sid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Encode a share code as URL-safe base64 JSON.
pub fn encode_share_code(code: &ShareCode) -> String {
    let json = serde_json::to_string(code).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Decode a pasted share code. Accepts raw JSON or base64 (with `-`/`_` or
/// `+`/`/` alphabets, padded or not).
pub fn decode_share_code(raw: &str) -> Option<ShareCode> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return parse_share_json(trimmed.as_bytes());
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 20 {
        return None;
    }

    let normalized = compact.replace('+', "-").replace('/', "_").replace('=', "");
    let decoded = URL_SAFE_NO_PAD.decode(normalized.as_bytes()).ok()?;
    parse_share_json(&decoded)
}

fn parse_share_json(bytes: &[u8]) -> Option<ShareCode> {
    let value = serde_json::from_slice::<Value>(bytes).ok()?;
    let sid = value_str(&value, &["sid", "store_id", "storeId"])?;
    Some(ShareCode {
        sid,
        url: value_str(&value, &["url"]),
        key: value_str(&value, &["key"]),
    })
}

/// Resolve user input into a store id: either a plain `store_...` identifier
/// or a pasted share code.
pub fn resolve_store_input(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("store_") {
        return Some(trimmed.to_string());
    }
    decode_share_code(trimmed).map(|code| code.sid)
}

/// The current tenant scope, cached over the persistent credential slot.
pub struct StoreSession<C: CredentialStore> {
    creds: C,
    current: RwLock<Option<String>>,
}

impl<C: CredentialStore> StoreSession<C> {
    /// Load the session, reading any persisted tenant id into the cache.
    pub fn new(creds: C) -> Self {
        let current = creds.get(KEY_STORE_ID);
        StoreSession {
            creds,
            current: RwLock::new(current),
        }
    }

    pub fn current_store_id(&self) -> Option<String> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.current_store_id().is_some()
    }

    /// The tenant id, or `NoSession` when none is established.
    pub fn require_store_id(&self) -> Result<String> {
        self.current_store_id().ok_or(Error::NoSession)
    }

    /// Persist a tenant id and make it current.
    pub fn persist(&self, store_id: &str) -> Result<()> {
        self.creds.set(KEY_STORE_ID, store_id)?;
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(store_id.to_string());
        }
        Ok(())
    }

    /// Persist the store's display profile alongside the id.
    pub fn persist_profile(&self, name: &str, owner: &str) -> Result<()> {
        self.creds.set(KEY_STORE_NAME, name)?;
        self.creds.set(KEY_OWNER_NAME, owner)?;
        Ok(())
    }

    /// Store name and owner, if persisted.
    pub fn profile(&self) -> (Option<String>, Option<String>) {
        (self.creds.get(KEY_STORE_NAME), self.creds.get(KEY_OWNER_NAME))
    }

    /// Clear the session. Local records are not touched, so rejoining the
    /// same store does not require a resync.
    pub fn clear(&self) -> Result<()> {
        self.creds.delete(KEY_STORE_ID)?;
        self.creds.delete(KEY_STORE_NAME)?;
        self.creds.delete(KEY_OWNER_NAME)?;
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
        info!("session cleared");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin gate
    // -----------------------------------------------------------------------

    /// Hash and persist the admin password. The plaintext is wiped after use.
    pub fn set_admin_password(&self, mut password: String) -> Result<()> {
        if password.trim().len() < MIN_ADMIN_PASSWORD_LEN {
            password.zeroize();
            return Err(Error::Validation(format!(
                "admin password must be at least {MIN_ADMIN_PASSWORD_LEN} characters"
            )));
        }
        let hash = bcrypt::hash(password.trim(), bcrypt::DEFAULT_COST)
            .map_err(|e| Error::LocalWrite(format!("hash admin password: {e}")))?;
        password.zeroize();
        self.creds.set(KEY_ADMIN_PASSWORD_HASH, &hash)?;
        info!("admin password updated");
        Ok(())
    }

    /// Verify a password attempt against the stored hash.
    pub fn verify_admin_password(&self, password: &str) -> Result<bool> {
        let Some(hash) = self.creds.get(KEY_ADMIN_PASSWORD_HASH) else {
            return Err(Error::Validation("admin password is not configured".into()));
        };
        bcrypt::verify(password, &hash)
            .map_err(|e| Error::LocalWrite(format!("verify admin password: {e}")))
    }
}
