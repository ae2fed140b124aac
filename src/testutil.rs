//! Shared test doubles: an in-memory remote store with scripted failures,
//! an in-memory credential slot, and engine constructors over in-memory
//! SQLite.

use rusqlite::Connection;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::api::RemoteStore;
use crate::db::{self, DbState};
use crate::error::{Error, Result};
use crate::models::Collection;
use crate::session::StoreSession;
use crate::storage::CredentialStore;
use crate::sync::SyncEngine;

/// Store id used by `logged_in_engine`.
pub const STORE: &str = "store_1712000000000_testsuite";

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCredentialStore {
    map: Mutex<HashMap<String, String>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockInner {
    stores: HashMap<String, Value>,
    docs: HashMap<String, HashMap<String, Value>>,
    next_id: u64,
    op_count: u32,
    unreachable: bool,
    fail_calls: HashSet<u32>,
    calls: Vec<String>,
}

/// In-memory `RemoteStore` with scripted failures. Every operation counts
/// as one call; `fail_call(n)` makes the n-th call (1-based) fail with a
/// transient error.
#[derive(Default)]
pub struct MockRemoteStore {
    inner: Mutex<MockInner>,
}

fn doc_key(store_id: &str, collection: Collection) -> String {
    format!("{store_id}/{}", collection.wire())
}

fn gate(inner: &mut MockInner, op: String) -> Result<()> {
    inner.calls.push(op);
    inner.op_count += 1;
    if inner.unreachable {
        return Err(Error::RemoteTransient("mock remote unreachable".into()));
    }
    if inner.fail_calls.contains(&inner.op_count) {
        return Err(Error::RemoteTransient("mock transient failure".into()));
    }
    Ok(())
}

impl MockRemoteStore {
    pub fn new() -> Self {
        MockRemoteStore::default()
    }

    pub fn set_unreachable(&self, down: bool) {
        self.inner.lock().unwrap().unreachable = down;
    }

    /// Fail the n-th gated call, counted from the next call made.
    pub fn fail_call(&self, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        let absolute = inner.op_count + n;
        inner.fail_calls.insert(absolute);
    }

    pub fn seed_store(&self, store_id: &str, doc: Value) {
        self.inner.lock().unwrap().stores.insert(store_id.to_string(), doc);
    }

    pub fn seed_doc(&self, store_id: &str, collection: Collection, remote_id: &str, fields: Value) {
        self.inner
            .lock()
            .unwrap()
            .docs
            .entry(doc_key(store_id, collection))
            .or_default()
            .insert(remote_id.to_string(), fields);
    }

    pub fn remove_doc(&self, store_id: &str, collection: Collection, remote_id: &str) {
        if let Some(bucket) = self.inner.lock().unwrap().docs.get_mut(&doc_key(store_id, collection)) {
            bucket.remove(remote_id);
        }
    }

    /// Remote documents of one collection, as `(remote_id, fields)` pairs
    /// sorted by remote id.
    pub fn docs_in(&self, store_id: &str, collection: Collection) -> Vec<(String, Value)> {
        let inner = self.inner.lock().unwrap();
        let mut docs: Vec<(String, Value)> = inner
            .docs
            .get(&doc_key(store_id, collection))
            .map(|bucket| bucket.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

impl RemoteStore for MockRemoteStore {
    async fn create(&self, store_id: &str, collection: Collection, fields: &Value) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("create {}", collection.wire()))?;
        let remote_id = format!("remote_{}", inner.next_id);
        inner.next_id += 1;
        inner
            .docs
            .entry(doc_key(store_id, collection))
            .or_default()
            .insert(remote_id.clone(), fields.clone());
        Ok(remote_id)
    }

    async fn get(&self, store_id: &str, collection: Collection, remote_id: &str) -> Result<Value> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("get {}/{remote_id}", collection.wire()))?;
        inner
            .docs
            .get(&doc_key(store_id, collection))
            .and_then(|bucket| bucket.get(remote_id))
            .cloned()
            .ok_or_else(|| Error::RemoteNotFound(format!("no such document: {remote_id}")))
    }

    async fn list(&self, store_id: &str, collection: Collection) -> Result<Vec<Value>> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("list {}", collection.wire()))?;
        let mut documents: Vec<Value> = inner
            .docs
            .get(&doc_key(store_id, collection))
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|(remote_id, fields)| {
                        let mut doc = fields.clone();
                        if let Some(obj) = doc.as_object_mut() {
                            obj.insert("id".into(), Value::String(remote_id.clone()));
                        }
                        doc
                    })
                    .collect()
            })
            .unwrap_or_default();
        documents.sort_by(|a, b| {
            a["id"].as_str().unwrap_or_default().cmp(b["id"].as_str().unwrap_or_default())
        });
        Ok(documents)
    }

    async fn update(
        &self,
        store_id: &str,
        collection: Collection,
        remote_id: &str,
        fields: &Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("update {}/{remote_id}", collection.wire()))?;
        let bucket = inner
            .docs
            .entry(doc_key(store_id, collection))
            .or_default();
        if !bucket.contains_key(remote_id) {
            return Err(Error::RemoteNotFound(format!("no such document: {remote_id}")));
        }
        bucket.insert(remote_id.to_string(), fields.clone());
        Ok(())
    }

    async fn delete(&self, store_id: &str, collection: Collection, remote_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("delete {}/{remote_id}", collection.wire()))?;
        let removed = inner
            .docs
            .get_mut(&doc_key(store_id, collection))
            .and_then(|bucket| bucket.remove(remote_id));
        if removed.is_none() {
            return Err(Error::RemoteNotFound(format!("no such document: {remote_id}")));
        }
        Ok(())
    }

    async fn create_store(&self, store_id: &str, fields: &Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("create_store {store_id}"))?;
        inner.stores.insert(store_id.to_string(), fields.clone());
        Ok(())
    }

    async fn get_store(&self, store_id: &str) -> Result<Value> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, format!("get_store {store_id}"))?;
        inner
            .stores
            .get(store_id)
            .cloned()
            .ok_or_else(|| Error::RemoteNotFound(format!("no such store: {store_id}")))
    }

    async fn ping(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        gate(&mut inner, "ping".to_string())
    }
}

// ---------------------------------------------------------------------------
// Engine constructors
// ---------------------------------------------------------------------------

/// Fresh in-memory database with all migrations applied.
pub fn memory_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragmas");
    db::run_migrations(&conn).expect("migrations");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

/// Engine over in-memory SQLite and credentials, with no session yet.
pub fn engine_with(remote: MockRemoteStore) -> SyncEngine<MockRemoteStore, MemoryCredentialStore> {
    let session = StoreSession::new(MemoryCredentialStore::default());
    SyncEngine::new(Arc::new(memory_db()), remote, session)
}

/// Engine with a persisted session for [`STORE`].
pub fn logged_in_engine(
    remote: MockRemoteStore,
) -> SyncEngine<MockRemoteStore, MemoryCredentialStore> {
    let engine = engine_with(remote);
    engine.session().persist(STORE).expect("persist test session");
    engine
}
