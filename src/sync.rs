//! Reconciliation engine for Enjoy The Gifts.
//!
//! Every domain mutation lands in the local store first and cannot be lost:
//! the remote write is opportunistic, and on failure (or while offline) the
//! change is recorded in the pending-change queue and replayed when
//! connectivity returns. Remote errors never propagate to mutation callers;
//! the local write is the operation's success contract.

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::RemoteStore;
use crate::db::{self, ChangeAction, DbState, PendingChange};
use crate::error::{Error, Result};
use crate::models::{self, Collection};
use crate::session::{self, StoreSession};
use crate::storage::CredentialStore;

// ---------------------------------------------------------------------------
// Connectivity and sync state
// ---------------------------------------------------------------------------

/// Process state for the sync engine. Connectivity is flipped by the shell's
/// online/offline signals and by the background loop's health-check; it is
/// read by every mutation to decide the write strategy.
pub struct SyncState {
    pub is_online: AtomicBool,
    pub is_syncing: AtomicBool,
    pub is_running: AtomicBool,
    pub last_sync: Mutex<Option<String>>,
}

impl SyncState {
    pub fn new() -> Self {
        SyncState {
            is_online: AtomicBool::new(true),
            is_syncing: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            last_sync: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.is_online.store(online, Ordering::SeqCst);
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::new()
    }
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainSummary {
    /// Changes replayed and removed.
    pub synced: usize,
    /// Changes dropped because their remote target no longer exists.
    pub dropped: usize,
    /// Changes left queued for the next drain.
    pub failed: usize,
    /// True when another drain was already in progress.
    pub skipped: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates the local store, the remote client, and the session. Holds
/// no persistent state of its own.
pub struct SyncEngine<R: RemoteStore, C: CredentialStore> {
    db: Arc<DbState>,
    remote: R,
    session: StoreSession<C>,
    state: Arc<SyncState>,
}

impl<R: RemoteStore, C: CredentialStore> SyncEngine<R, C> {
    pub fn new(db: Arc<DbState>, remote: R, session: StoreSession<C>) -> Self {
        SyncEngine {
            db,
            remote,
            session,
            state: Arc::new(SyncState::new()),
        }
    }

    pub fn session(&self) -> &StoreSession<C> {
        &self.session
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    /// Run a closure against the database connection. The guard never spans
    /// an await point.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| Error::LocalWrite(format!("db lock poisoned: {e}")))?;
        f(&conn)
    }

    // -----------------------------------------------------------------------
    // Reads (the UI goes through the engine for everything)
    // -----------------------------------------------------------------------

    pub fn get_record(&self, collection: Collection, local_id: &str) -> Result<Option<Value>> {
        self.with_conn(|conn| db::get_record(conn, collection, local_id))
    }

    pub fn list_records(&self, collection: Collection) -> Result<Vec<Value>> {
        let store_id = self.session.require_store_id()?;
        self.with_conn(|conn| db::list_records(conn, collection, &store_id))
    }

    pub fn pending_count(&self) -> Result<i64> {
        self.with_conn(db::count_pending)
    }

    /// Next sequential invoice number (persistent counter).
    pub fn next_invoice_number(&self) -> Result<String> {
        self.with_conn(next_invoice_number)
    }

    #[cfg(test)]
    pub(crate) fn remote(&self) -> &R {
        &self.remote
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Save a new record. The local write always happens (its failure is
    /// fatal); the remote create is opportunistic. Returns the local id and
    /// never a remote error.
    pub async fn save_record(&self, collection: Collection, fields: Value) -> Result<String> {
        models::validate(collection, &fields)?;
        let store_id = self.session.require_store_id()?;
        let local_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            db::insert_record(conn, collection, &local_id, &store_id, &fields, &now)
        })?;

        if self.state.is_online() {
            match self.remote.create(&store_id, collection, &fields).await {
                Ok(remote_id) => {
                    self.with_conn(|conn| {
                        db::set_remote_id(conn, collection, &local_id, &remote_id)
                    })?;
                    debug!(collection = collection.table(), %local_id, %remote_id, "record created remotely");
                    return Ok(local_id);
                }
                Err(e) => {
                    warn!(collection = collection.table(), %local_id, error = %e, "remote create failed; queueing change");
                }
            }
        }

        self.with_conn(|conn| {
            db::enqueue_pending(conn, collection, ChangeAction::Add, &local_id, &fields)
        })?;
        Ok(local_id)
    }

    /// Merge `patch` into a record. The local update always happens; the
    /// remote update is attempted only when a remote id already exists.
    pub async fn update_record(
        &self,
        collection: Collection,
        local_id: &str,
        patch: Value,
    ) -> Result<()> {
        models::validate_patch(collection, &patch)?;
        let store_id = self.session.require_store_id()?;
        let now = Utc::now().to_rfc3339();

        let (remote_id, merged) = self.with_conn(|conn| {
            let existing = db::get_record(conn, collection, local_id)?.ok_or_else(|| {
                Error::Validation(format!("no {} record with id {local_id}", collection.table()))
            })?;
            db::update_record_fields(conn, collection, local_id, &patch, &now)?;
            let merged = db::get_record(conn, collection, local_id)?.ok_or_else(|| {
                Error::LocalWrite(format!("{} record vanished mid-update", collection.table()))
            })?;
            let remote_id = existing
                .get("remote_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok((remote_id, db::strip_envelope(&merged)))
        })?;

        if let Some(rid) = remote_id.as_deref() {
            if self.state.is_online() {
                match self.remote.update(&store_id, collection, rid, &merged).await {
                    Ok(()) => {
                        debug!(collection = collection.table(), %local_id, "record updated remotely");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(collection = collection.table(), %local_id, error = %e, "remote update failed; queueing change");
                    }
                }
            }
        }

        // Snapshot carries the remote id when known; otherwise the replay
        // resolves it from the local record once the add has reconciled.
        let mut payload = merged;
        if let (Some(obj), Some(rid)) = (payload.as_object_mut(), remote_id.as_deref()) {
            obj.insert("remote_id".into(), Value::String(rid.to_string()));
        }
        self.with_conn(|conn| {
            db::enqueue_pending(conn, collection, ChangeAction::Update, local_id, &payload)
        })?;
        Ok(())
    }

    /// Delete a record. The local delete always happens. A record that never
    /// reached the remote store has its queued changes cancelled instead of
    /// enqueueing a delete against a remote id that does not exist.
    pub async fn delete_record(&self, collection: Collection, local_id: &str) -> Result<()> {
        let store_id = self.session.require_store_id()?;

        let deleted = self.with_conn(|conn| {
            let Some(existing) = db::get_record(conn, collection, local_id)? else {
                return Ok(None);
            };
            db::delete_record(conn, collection, local_id)?;
            Ok(Some(
                existing
                    .get("remote_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ))
        })?;

        let Some(remote_id) = deleted else {
            debug!(collection = collection.table(), %local_id, "delete of unknown record; nothing to do");
            return Ok(());
        };

        match remote_id {
            Some(rid) => {
                if self.state.is_online() {
                    match self.remote.delete(&store_id, collection, &rid).await {
                        Ok(()) => {
                            debug!(collection = collection.table(), %local_id, "record deleted remotely");
                            return Ok(());
                        }
                        Err(e) if e.is_not_found() => {
                            debug!(collection = collection.table(), %local_id, "remote record already gone");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(collection = collection.table(), %local_id, error = %e, "remote delete failed; queueing change");
                        }
                    }
                }
                let payload = json!({ "remote_id": rid });
                self.with_conn(|conn| {
                    db::enqueue_pending(conn, collection, ChangeAction::Delete, local_id, &payload)
                })?;
            }
            None => {
                let cancelled = self.with_conn(|conn| {
                    db::cancel_pending_for_record(conn, collection, local_id)
                })?;
                debug!(
                    collection = collection.table(),
                    %local_id, cancelled, "record deleted before first remote write; queued changes cancelled"
                );
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queue drain
    // -----------------------------------------------------------------------

    /// Replay queued changes in enqueue order. A failing item stays queued
    /// and does not block the rest; an item whose remote target is gone is
    /// dropped. Invoked on connectivity restore and on manual sync.
    pub async fn drain_pending_changes(&self) -> Result<DrainSummary> {
        if self.state.is_syncing.swap(true, Ordering::SeqCst) {
            debug!("drain already in progress; skipping");
            return Ok(DrainSummary {
                skipped: true,
                ..DrainSummary::default()
            });
        }
        let result = self.drain_inner().await;
        self.state.is_syncing.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_inner(&self) -> Result<DrainSummary> {
        let store_id = self.session.require_store_id()?;
        let pending = self.with_conn(db::list_pending)?;
        let mut summary = DrainSummary::default();

        for change in &pending {
            match self.replay_change(&store_id, change).await {
                Ok(()) => {
                    self.with_conn(|conn| db::remove_pending(conn, change.id))?;
                    summary.synced += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!(
                        change_id = change.id,
                        collection = change.collection.table(),
                        error = %e,
                        "replay target no longer exists; dropping change"
                    );
                    self.with_conn(|conn| db::remove_pending(conn, change.id))?;
                    summary.dropped += 1;
                }
                Err(e) => {
                    warn!(
                        change_id = change.id,
                        collection = change.collection.table(),
                        error = %e,
                        "replay failed; change stays queued"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary.synced > 0 || summary.dropped > 0 {
            if let Ok(mut guard) = self.state.last_sync.lock() {
                *guard = Some(Utc::now().to_rfc3339());
            }
        }
        if !pending.is_empty() {
            info!(
                synced = summary.synced,
                dropped = summary.dropped,
                failed = summary.failed,
                "pending-change drain finished"
            );
        }
        Ok(summary)
    }

    async fn replay_change(&self, store_id: &str, change: &PendingChange) -> Result<()> {
        match change.action {
            ChangeAction::Add => {
                let fields = db::strip_envelope(&change.payload);
                let remote_id = self.remote.create(store_id, change.collection, &fields).await?;
                // The record may have been removed locally since; patching a
                // missing row is a no-op.
                self.with_conn(|conn| {
                    db::set_remote_id(conn, change.collection, &change.record_id, &remote_id)
                })?;
                Ok(())
            }
            ChangeAction::Update => {
                // Prefer the snapshot's remote id; otherwise the add drained
                // earlier in this pass has patched the local record.
                let remote_id = match change.payload.get("remote_id").and_then(Value::as_str) {
                    Some(rid) => Some(rid.to_string()),
                    None => self.with_conn(|conn| {
                        Ok(db::get_record(conn, change.collection, &change.record_id)?
                            .and_then(|rec| {
                                rec.get("remote_id").and_then(Value::as_str).map(str::to_string)
                            }))
                    })?,
                };
                let Some(rid) = remote_id else {
                    return Err(Error::RemoteTransient(
                        "record has no remote id yet; add not reconciled".into(),
                    ));
                };
                let fields = db::strip_envelope(&change.payload);
                self.remote.update(store_id, change.collection, &rid, &fields).await
            }
            ChangeAction::Delete => {
                let Some(rid) = change.payload.get("remote_id").and_then(Value::as_str) else {
                    // No remote id was ever assigned; nothing to delete.
                    return Ok(());
                };
                self.remote.delete(store_id, change.collection, rid).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Session operations (remote failures surface to the caller)
    // -----------------------------------------------------------------------

    /// Create a new store. The identifier is generated locally, registered
    /// remotely on a best-effort basis, persisted, and returned so it can be
    /// shown to the user - it is the only way to rejoin the store later.
    pub async fn create_store(&self, name: &str, owner: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::Validation("store name is required".into()));
        }
        let store_id = session::new_store_id();
        let fields = json!({
            "store_id": store_id,
            "name": name.trim(),
            "owner_name": owner.trim(),
            "created_at": Utc::now().to_rfc3339(),
        });

        if self.state.is_online() {
            if let Err(e) = self.remote.create_store(&store_id, &fields).await {
                warn!(%store_id, error = %e, "store not registered remotely; local store remains usable");
            }
        }

        self.session.persist(&store_id)?;
        self.session.persist_profile(name.trim(), owner.trim())?;
        // Mirror the tenant id into local_settings; the credential slot stays
        // authoritative across schema migrations.
        self.with_conn(|conn| db::set_setting(conn, "session", "store_id", &store_id))?;
        info!(%store_id, "created store");
        Ok(store_id)
    }

    /// Join an existing store by id or share code. Validates the id against
    /// the remote store first: on `RemoteNotFound` (or network failure) the
    /// previously persisted session is left untouched.
    pub async fn join_store(&self, input: &str) -> Result<Value> {
        let store_id = session::resolve_store_input(input)
            .ok_or_else(|| Error::Validation("store id is required".into()))?;

        let store = self.remote.get_store(&store_id).await?;

        self.session.persist(&store_id)?;
        self.with_conn(|conn| db::set_setting(conn, "session", "store_id", &store_id))?;
        if let Some(name) = store.get("name").and_then(Value::as_str) {
            let owner = store.get("owner_name").and_then(Value::as_str).unwrap_or_default();
            self.session.persist_profile(name, owner)?;
        }

        match self.pull_from_remote().await {
            Ok(pulled) => info!(%store_id, pulled, "joined store"),
            Err(e) => warn!(%store_id, error = %e, "joined store but initial pull failed; retry with manual sync"),
        }
        Ok(store)
    }

    /// Clear the session. Local records are retained, so rejoining the same
    /// store does not need a full resync.
    pub fn logout(&self) -> Result<()> {
        self.session.clear()?;
        self.with_conn(|conn| db::delete_all_settings(conn, "session"))?;
        info!("logged out; local records retained");
        Ok(())
    }

    /// Pull every tenant-scoped record from the remote store and upsert it
    /// locally, keyed by remote id. Returns the number of records upserted.
    pub async fn pull_from_remote(&self) -> Result<usize> {
        let store_id = self.session.require_store_id()?;
        let mut pulled = 0;

        for &collection in Collection::ALL {
            let documents = self.remote.list(&store_id, collection).await?;
            let now = Utc::now().to_rfc3339();
            pulled += self.with_conn(|conn| {
                let mut count = 0;
                for doc in &documents {
                    let Some(remote_id) = doc.get("id").and_then(Value::as_str) else {
                        warn!(collection = collection.table(), "remote document without id; skipping");
                        continue;
                    };
                    let fields = db::strip_envelope(doc);
                    db::upsert_by_remote_id(conn, collection, &store_id, remote_id, &fields, &now)?;
                    count += 1;
                }
                Ok(count)
            })?;
        }
        Ok(pulled)
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    /// Probe the sync backend and record the result.
    pub async fn check_network(&self) -> bool {
        let online = self.remote.ping().await.is_ok();
        self.state.set_online(online);
        online
    }

    /// Handle the shell's transition-to-online signal: mark online and drain.
    pub async fn network_restored(&self) -> Result<DrainSummary> {
        self.state.set_online(true);
        self.drain_pending_changes().await
    }

    /// Handle the shell's transition-to-offline signal.
    pub fn network_lost(&self) {
        self.state.set_online(false);
    }

    /// Manual sync request. Unlike background drains, failures surface to
    /// the caller because the user explicitly asked for a remote action.
    pub async fn force_sync(&self) -> Result<DrainSummary> {
        self.session.require_store_id()?;
        if !self.check_network().await {
            return Err(Error::RemoteTransient("sync backend unreachable".into()));
        }
        self.drain_pending_changes().await
    }

    /// Current sync posture for the shell's status indicators.
    pub fn sync_status(&self) -> Result<Value> {
        let pending = self.pending_count()?;
        let store_id = self.session.current_store_id();
        let last_sync = self.state.last_sync.lock().ok().and_then(|g| g.clone());
        Ok(json!({
            "isOnline": self.state.is_online(),
            "storeId": store_id,
            "hasStoreId": store_id.is_some(),
            "pendingChanges": pending,
            "isSyncing": self.state.is_syncing.load(Ordering::SeqCst),
            "lastSync": last_sync,
        }))
    }

    /// Stop the background sync loop after its current tick.
    pub fn stop_sync_loop(&self) {
        self.state.is_running.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Invoice numbering
// ---------------------------------------------------------------------------

/// Generate a sequential invoice number in format INV-DDMMYYYY-NNNNN.
///
/// Uses `local_settings` (category='sales', key='invoice_counter') as a
/// persistent counter.
pub(crate) fn next_invoice_number(conn: &Connection) -> Result<String> {
    let today = chrono::Local::now();
    let date_display = today.format("%d%m%Y").to_string();

    let current: i64 = db::get_setting(conn, "sales", "invoice_counter")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    let next = current + 1;
    db::set_setting(conn, "sales", "invoice_counter", &next.to_string())?;

    Ok(format!("INV-{date_display}-{next:05}"))
}

// ---------------------------------------------------------------------------
// Background sync loop
// ---------------------------------------------------------------------------

/// Start the background sync loop. Spawns a tokio task that probes
/// connectivity every `interval_secs` seconds and drains the queue whenever
/// the backend is reachable.
pub fn start_sync_loop<R, C>(engine: Arc<SyncEngine<R, C>>, interval_secs: u64)
where
    R: RemoteStore + 'static,
    C: CredentialStore + 'static,
{
    let state = engine.state().clone();
    state.is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Sync loop started (interval: {interval_secs}s)");
        let mut previous_online: Option<bool> = None;

        loop {
            if !state.is_running.load(Ordering::SeqCst) {
                info!("Sync loop stopped");
                break;
            }

            tokio::time::sleep(Duration::from_secs(interval_secs)).await;

            if !state.is_running.load(Ordering::SeqCst) {
                break;
            }

            let online = engine.check_network().await;
            if !online {
                if previous_online != Some(false) {
                    info!("Network offline; keeping queue pending");
                }
                previous_online = Some(false);
                continue;
            }

            if previous_online == Some(false) {
                info!("Network restored; resuming queued sync");
            }
            previous_online = Some(true);

            if !engine.session().is_logged_in() {
                continue;
            }

            match engine.drain_pending_changes().await {
                Ok(summary) => {
                    if summary.synced > 0 {
                        info!(synced = summary.synced, "sync cycle complete");
                    }
                }
                Err(e) => warn!("sync cycle failed: {e}"),
            }
        }
    });
}
