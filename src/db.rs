//! Local SQLite database layer for Enjoy The Gifts.
//!
//! Uses rusqlite with WAL mode, filling the role IndexedDB played in the
//! browser app: the local store is the source of truth for reads and the
//! first stop for every mutation. Provides schema migrations, generic
//! per-collection record CRUD over JSON documents, the pending-change
//! queue, and settings helpers.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::Collection;

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Envelope columns kept outside the JSON document. Stripped from incoming
/// field maps and merged back into outgoing ones.
pub const ENVELOPE_KEYS: &[&str] = &["id", "store_id", "remote_id", "created_at", "updated_at"];

/// Initialize the database at `{app_data_dir}/store.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(app_data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(app_data_dir)
        .map_err(|e| Error::LocalWrite(format!("failed to create data dir: {e}")))?;

    let db_path = app_data_dir.join("store.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!("Database open failed ({first_err}), deleting and retrying once");
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| Error::LocalWrite(format!("database open failed after retry: {e}")))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).map_err(|e| Error::LocalWrite(format!("sqlite open: {e}")))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| Error::LocalWrite(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| Error::LocalWrite(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: core collections, pending-change queue, local settings.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- document collections
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            remote_id TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            remote_id TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            remote_id TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- pending_changes (append-only replay queue)
        CREATE TABLE IF NOT EXISTS pending_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('add', 'update', 'delete')),
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_products_remote_id ON products(remote_id);
        CREATE INDEX IF NOT EXISTS idx_categories_remote_id ON categories(remote_id);
        CREATE INDEX IF NOT EXISTS idx_sales_remote_id ON sales(remote_id);
        CREATE INDEX IF NOT EXISTS idx_pending_record ON pending_changes(collection, record_id);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        Error::LocalWrite(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: expense and revenue tracking.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            remote_id TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS revenues (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            remote_id TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_remote_id ON expenses(remote_id);
        CREATE INDEX IF NOT EXISTS idx_revenues_remote_id ON revenues(remote_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        Error::LocalWrite(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2");
    Ok(())
}

/// Migration v3: soft-deleted invoices for the admin restore flow, plus
/// secondary lookup indexes on business fields inside the JSON documents.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS deleted_invoices (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            remote_id TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_deleted_invoices_remote_id ON deleted_invoices(remote_id);

        CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(json_extract(data, '$.sale_date'));
        CREATE INDEX IF NOT EXISTS idx_sales_customer ON sales(json_extract(data, '$.customer_name'));
        CREATE INDEX IF NOT EXISTS idx_sales_status ON sales(json_extract(data, '$.status'));
        CREATE INDEX IF NOT EXISTS idx_products_name ON products(json_extract(data, '$.name'));
        CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(json_extract(data, '$.date'));
        CREATE INDEX IF NOT EXISTS idx_revenues_date ON revenues(json_extract(data, '$.date'));

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        Error::LocalWrite(format!("migration v3: {e}"))
    })?;

    info!("Applied migration v3");
    Ok(())
}

// ---------------------------------------------------------------------------
// Record CRUD (generic over collections)
// ---------------------------------------------------------------------------

/// Remove envelope keys from a field map, leaving only domain fields.
pub fn strip_envelope(value: &Value) -> Value {
    match value.as_object() {
        Some(obj) => Value::Object(
            obj.iter()
                .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => value.clone(),
    }
}

/// Insert a new record. `fields` is stored as the JSON document with any
/// envelope keys stripped.
pub fn insert_record(
    conn: &Connection,
    collection: Collection,
    local_id: &str,
    store_id: &str,
    fields: &Value,
    now: &str,
) -> Result<()> {
    let data = serde_json::to_string(&strip_envelope(fields))
        .map_err(|e| Error::LocalWrite(format!("serialize record: {e}")))?;
    conn.execute(
        &format!(
            "INSERT INTO {} (id, store_id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            collection.table()
        ),
        params![local_id, store_id, data, now],
    )?;
    Ok(())
}

/// Read a record by local id, with envelope columns merged into the document.
pub fn get_record(
    conn: &Connection,
    collection: Collection,
    local_id: &str,
) -> Result<Option<Value>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT store_id, remote_id, data, created_at, updated_at FROM {} WHERE id = ?1",
                collection.table()
            ),
            params![local_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((store_id, remote_id, data, created_at, updated_at)) = row else {
        return Ok(None);
    };
    Ok(Some(merge_envelope(
        local_id,
        &store_id,
        remote_id.as_deref(),
        &data,
        &created_at,
        &updated_at,
    )?))
}

/// Merge a `patch` of domain fields into a record's document and bump
/// `updated_at`. Returns `false` when the record does not exist.
pub fn update_record_fields(
    conn: &Connection,
    collection: Collection,
    local_id: &str,
    patch: &Value,
    now: &str,
) -> Result<bool> {
    let existing: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {} WHERE id = ?1", collection.table()),
            params![local_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(existing) = existing else {
        return Ok(false);
    };

    let mut doc: Value = serde_json::from_str(&existing)
        .map_err(|e| Error::LocalWrite(format!("corrupt record document: {e}")))?;
    if let (Some(target), Some(source)) = (doc.as_object_mut(), patch.as_object()) {
        for (key, value) in source {
            if !ENVELOPE_KEYS.contains(&key.as_str()) {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    let data = serde_json::to_string(&doc)
        .map_err(|e| Error::LocalWrite(format!("serialize record: {e}")))?;
    conn.execute(
        &format!(
            "UPDATE {} SET data = ?1, updated_at = ?2 WHERE id = ?3",
            collection.table()
        ),
        params![data, now, local_id],
    )?;
    Ok(true)
}

/// Delete a record by local id. Returns `false` when it did not exist.
pub fn delete_record(conn: &Connection, collection: Collection, local_id: &str) -> Result<bool> {
    let changed = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", collection.table()),
        params![local_id],
    )?;
    Ok(changed > 0)
}

/// List every record of a collection belonging to one store, oldest first.
pub fn list_records(
    conn: &Connection,
    collection: Collection,
    store_id: &str,
) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, store_id, remote_id, data, created_at, updated_at FROM {} \
         WHERE store_id = ?1 ORDER BY created_at, id",
        collection.table()
    ))?;
    let rows = stmt.query_map(params![store_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, sid, remote_id, data, created_at, updated_at) = row?;
        records.push(merge_envelope(
            &id,
            &sid,
            remote_id.as_deref(),
            &data,
            &created_at,
            &updated_at,
        )?);
    }
    Ok(records)
}

/// Record the remote identifier assigned by a successful remote create.
pub fn set_remote_id(
    conn: &Connection,
    collection: Collection,
    local_id: &str,
    remote_id: &str,
) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET remote_id = ?1 WHERE id = ?2",
            collection.table()
        ),
        params![remote_id, local_id],
    )?;
    Ok(())
}

/// Find the local id of the record holding a remote id, if any.
pub fn find_by_remote_id(
    conn: &Connection,
    collection: Collection,
    remote_id: &str,
) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            &format!("SELECT id FROM {} WHERE remote_id = ?1", collection.table()),
            params![remote_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Upsert a record pulled from the remote store, keyed by its remote id.
/// Returns the local id.
pub fn upsert_by_remote_id(
    conn: &Connection,
    collection: Collection,
    store_id: &str,
    remote_id: &str,
    fields: &Value,
    now: &str,
) -> Result<String> {
    if let Some(local_id) = find_by_remote_id(conn, collection, remote_id)? {
        update_record_fields(conn, collection, &local_id, fields, now)?;
        return Ok(local_id);
    }
    let local_id = uuid::Uuid::new_v4().to_string();
    insert_record(conn, collection, &local_id, store_id, fields, now)?;
    set_remote_id(conn, collection, &local_id, remote_id)?;
    Ok(local_id)
}

fn merge_envelope(
    id: &str,
    store_id: &str,
    remote_id: Option<&str>,
    data: &str,
    created_at: &str,
    updated_at: &str,
) -> Result<Value> {
    let mut doc: Value = serde_json::from_str(data)
        .map_err(|e| Error::LocalWrite(format!("corrupt record document: {e}")))?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("id".into(), Value::String(id.to_string()));
        obj.insert("store_id".into(), Value::String(store_id.to_string()));
        obj.insert(
            "remote_id".into(),
            remote_id
                .map(|r| Value::String(r.to_string()))
                .unwrap_or(Value::Null),
        );
        obj.insert("created_at".into(), Value::String(created_at.to_string()));
        obj.insert("updated_at".into(), Value::String(updated_at.to_string()));
    }
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Pending-change queue
// ---------------------------------------------------------------------------

/// The action a queued change replays against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeAction::Add => "add",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<ChangeAction> {
        match raw {
            "add" => Some(ChangeAction::Add),
            "update" => Some(ChangeAction::Update),
            "delete" => Some(ChangeAction::Delete),
            _ => None,
        }
    }
}

/// A deferred mutation awaiting replay against the remote store.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub id: i64,
    pub collection: Collection,
    pub action: ChangeAction,
    pub record_id: String,
    pub payload: Value,
    pub created_at: String,
}

/// Append a change to the replay queue.
pub fn enqueue_pending(
    conn: &Connection,
    collection: Collection,
    action: ChangeAction,
    record_id: &str,
    payload: &Value,
) -> Result<i64> {
    let payload = serde_json::to_string(payload)
        .map_err(|e| Error::LocalWrite(format!("serialize pending change: {e}")))?;
    conn.execute(
        "INSERT INTO pending_changes (collection, action, record_id, payload) VALUES (?1, ?2, ?3, ?4)",
        params![collection.table(), action.as_str(), record_id, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All queued changes in enqueue order.
pub fn list_pending(conn: &Connection) -> Result<Vec<PendingChange>> {
    let mut stmt = conn.prepare(
        "SELECT id, collection, action, record_id, payload, created_at \
         FROM pending_changes ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut changes = Vec::new();
    for row in rows {
        let (id, collection, action, record_id, payload, created_at) = row?;
        let Some(collection) = Collection::parse(&collection) else {
            warn!(change_id = id, collection, "pending change for unknown collection; skipping");
            continue;
        };
        let Some(action) = ChangeAction::parse(&action) else {
            warn!(change_id = id, action, "pending change with unknown action; skipping");
            continue;
        };
        let payload: Value = serde_json::from_str(&payload)
            .map_err(|e| Error::LocalWrite(format!("corrupt pending payload: {e}")))?;
        changes.push(PendingChange {
            id,
            collection,
            action,
            record_id,
            payload,
            created_at,
        });
    }
    Ok(changes)
}

/// Remove a change once it has been replayed (or dropped).
pub fn remove_pending(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM pending_changes WHERE id = ?1", params![id])?;
    Ok(())
}

/// Cancel every queued `add`/`update` for a record that was deleted before
/// its first remote write. Returns the number of rows removed.
pub fn cancel_pending_for_record(
    conn: &Connection,
    collection: Collection,
    record_id: &str,
) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM pending_changes \
         WHERE collection = ?1 AND record_id = ?2 AND action IN ('add', 'update')",
        params![collection.table(), record_id],
    )?;
    Ok(removed)
}

pub fn count_pending(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?)
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a local setting, or `None` when unset.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings \
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

/// Write (or overwrite) a local setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at) \
         VALUES (?1, ?2, ?3, datetime('now')) \
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET \
            setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Delete every setting in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STORE: &str = "store_1712000000000_abcdefghi";

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragmas");
        run_migrations(&conn).expect("migrations");
        conn
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = migrated();
        run_migrations(&conn).expect("second run");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        for &collection in Collection::ALL {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", collection.table()),
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 0, "{collection} should exist and be empty");
        }
    }

    #[test]
    fn test_record_crud_round_trip() {
        let conn = migrated();
        let fields = json!({"name": "Mug", "price": 12.5, "quantity": 3});
        insert_record(&conn, Collection::Products, "p1", STORE, &fields, "2024-05-01T10:00:00Z")
            .expect("insert");

        let record = get_record(&conn, Collection::Products, "p1")
            .expect("get")
            .expect("some");
        assert_eq!(record["id"], "p1");
        assert_eq!(record["store_id"], STORE);
        assert_eq!(record["remote_id"], Value::Null);
        assert_eq!(record["name"], "Mug");
        assert_eq!(record["created_at"], "2024-05-01T10:00:00Z");

        let updated = update_record_fields(
            &conn,
            Collection::Products,
            "p1",
            &json!({"quantity": 2, "id": "bogus"}),
            "2024-05-02T10:00:00Z",
        )
        .expect("update");
        assert!(updated);

        let record = get_record(&conn, Collection::Products, "p1").unwrap().unwrap();
        assert_eq!(record["quantity"], 2);
        assert_eq!(record["id"], "p1", "envelope keys in a patch are ignored");
        assert_eq!(record["updated_at"], "2024-05-02T10:00:00Z");

        assert!(delete_record(&conn, Collection::Products, "p1").unwrap());
        assert!(get_record(&conn, Collection::Products, "p1").unwrap().is_none());
        assert!(!delete_record(&conn, Collection::Products, "p1").unwrap());
    }

    #[test]
    fn test_list_records_scoped_by_store() {
        let conn = migrated();
        let fields = json!({"description": "Rent", "amount": 100.0, "date": "2024-05-01"});
        insert_record(&conn, Collection::Expenses, "e1", STORE, &fields, "2024-05-01T08:00:00Z")
            .unwrap();
        insert_record(&conn, Collection::Expenses, "e2", STORE, &fields, "2024-05-01T09:00:00Z")
            .unwrap();
        insert_record(
            &conn,
            Collection::Expenses,
            "e3",
            "store_other",
            &fields,
            "2024-05-01T07:00:00Z",
        )
        .unwrap();

        let records = list_records(&conn, Collection::Expenses, STORE).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "e1", "oldest first");
        assert_eq!(records[1]["id"], "e2");
    }

    #[test]
    fn test_remote_id_assignment_and_upsert() {
        let conn = migrated();
        let fields = json!({"name": "Gift wrap"});
        insert_record(&conn, Collection::Categories, "c1", STORE, &fields, "2024-05-01T08:00:00Z")
            .unwrap();

        set_remote_id(&conn, Collection::Categories, "c1", "remote_9").unwrap();
        assert_eq!(
            find_by_remote_id(&conn, Collection::Categories, "remote_9").unwrap(),
            Some("c1".to_string())
        );

        // Upsert with a known remote id updates in place
        let local = upsert_by_remote_id(
            &conn,
            Collection::Categories,
            STORE,
            "remote_9",
            &json!({"name": "Wrapping"}),
            "2024-05-02T08:00:00Z",
        )
        .unwrap();
        assert_eq!(local, "c1");
        let record = get_record(&conn, Collection::Categories, "c1").unwrap().unwrap();
        assert_eq!(record["name"], "Wrapping");

        // Upsert with an unknown remote id inserts a fresh record
        let fresh = upsert_by_remote_id(
            &conn,
            Collection::Categories,
            STORE,
            "remote_10",
            &json!({"name": "Cards"}),
            "2024-05-02T08:00:00Z",
        )
        .unwrap();
        assert_ne!(fresh, "c1");
        let record = get_record(&conn, Collection::Categories, &fresh).unwrap().unwrap();
        assert_eq!(record["remote_id"], "remote_10");
    }

    #[test]
    fn test_pending_queue_order_and_cancel() {
        let conn = migrated();
        let payload = json!({"name": "Mug"});
        enqueue_pending(&conn, Collection::Products, ChangeAction::Add, "p1", &payload).unwrap();
        enqueue_pending(&conn, Collection::Products, ChangeAction::Update, "p1", &payload).unwrap();
        enqueue_pending(&conn, Collection::Sales, ChangeAction::Add, "s1", &payload).unwrap();

        let pending = list_pending(&conn).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].action, ChangeAction::Add);
        assert_eq!(pending[0].record_id, "p1");
        assert_eq!(pending[2].collection, Collection::Sales);
        assert_eq!(count_pending(&conn).unwrap(), 3);

        // Cancelling p1 removes its add and update but not the sale
        let removed = cancel_pending_for_record(&conn, Collection::Products, "p1").unwrap();
        assert_eq!(removed, 2);
        let pending = list_pending(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, "s1");

        remove_pending(&conn, pending[0].id).unwrap();
        assert_eq!(count_pending(&conn).unwrap(), 0);
    }

    #[test]
    fn test_pending_rejects_unknown_action() {
        let conn = migrated();
        let bad = conn.execute(
            "INSERT INTO pending_changes (collection, action, record_id, payload) \
             VALUES ('products', 'upsert', 'p1', '{}')",
            [],
        );
        assert!(bad.is_err(), "CHECK constraint should reject unknown actions");
    }

    #[test]
    fn test_settings_crud() {
        let conn = migrated();

        set_setting(&conn, "sales", "invoice_counter", "7").expect("set");
        assert_eq!(get_setting(&conn, "sales", "invoice_counter"), Some("7".into()));

        set_setting(&conn, "sales", "invoice_counter", "8").expect("update");
        assert_eq!(get_setting(&conn, "sales", "invoice_counter"), Some("8".into()));

        delete_all_settings(&conn, "sales").expect("delete");
        assert!(get_setting(&conn, "sales", "invoice_counter").is_none());
    }
}
