//! Backup export and import.
//!
//! The export file is a single JSON document covering every collection plus
//! the store profile. Import is not a byte-for-byte restore: each record is
//! replayed through the reconciliation engine as a brand-new record, so
//! local ids are reassigned and offline imports queue their remote creates
//! like any other mutation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::api::RemoteStore;
use crate::db;
use crate::error::Result;
use crate::models::Collection;
use crate::storage::CredentialStore;
use crate::sync::SyncEngine;

/// The backup file format. Top-level keys are part of the on-disk contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    #[serde(default)]
    pub products: Vec<Value>,
    #[serde(default)]
    pub categories: Vec<Value>,
    #[serde(default)]
    pub sales: Vec<Value>,
    #[serde(default)]
    pub expenses: Vec<Value>,
    #[serde(default)]
    pub revenues: Vec<Value>,
    #[serde(default, rename = "deletedInvoices")]
    pub deleted_invoices: Vec<Value>,
    #[serde(rename = "storeSettings")]
    pub store_settings: Value,
    #[serde(rename = "exportDate")]
    pub export_date: String,
}

/// Counts of records re-created by an import.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub categories: usize,
    pub products: usize,
    pub sales: usize,
    pub expenses: usize,
    pub revenues: usize,
    pub deleted_invoices: usize,
}

/// Export every collection of the current store from the local store.
pub fn export_store<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
) -> Result<ExportBundle> {
    let store_id = engine.session().require_store_id()?;
    let (name, owner) = engine.session().profile();

    let bundle = ExportBundle {
        products: engine.list_records(Collection::Products)?,
        categories: engine.list_records(Collection::Categories)?,
        sales: engine.list_records(Collection::Sales)?,
        expenses: engine.list_records(Collection::Expenses)?,
        revenues: engine.list_records(Collection::Revenues)?,
        deleted_invoices: engine.list_records(Collection::DeletedInvoices)?,
        store_settings: json!({
            "store_id": store_id,
            "name": name,
            "owner_name": owner,
        }),
        export_date: Utc::now().to_rfc3339(),
    };
    info!(
        products = bundle.products.len(),
        sales = bundle.sales.len(),
        "store exported"
    );
    Ok(bundle)
}

/// Suggested file name for a bundle, e.g. `enjoy-gifts-backup-2024-05-01.json`.
pub fn export_file_name(bundle: &ExportBundle) -> String {
    let day = bundle.export_date.split('T').next().unwrap_or("export");
    format!("enjoy-gifts-backup-{day}.json")
}

/// Import a bundle into the current store. Every record is re-created
/// through the engine with a fresh local id; the bundle's ids and remote ids
/// are dropped.
pub async fn import_store<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
    bundle: &ExportBundle,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for record in &bundle.categories {
        engine
            .save_record(Collection::Categories, db::strip_envelope(record))
            .await?;
        summary.categories += 1;
    }
    for record in &bundle.products {
        engine
            .save_record(Collection::Products, db::strip_envelope(record))
            .await?;
        summary.products += 1;
    }
    for record in &bundle.sales {
        engine
            .save_record(Collection::Sales, db::strip_envelope(record))
            .await?;
        summary.sales += 1;
    }
    for record in &bundle.expenses {
        engine
            .save_record(Collection::Expenses, db::strip_envelope(record))
            .await?;
        summary.expenses += 1;
    }
    for record in &bundle.revenues {
        engine
            .save_record(Collection::Revenues, db::strip_envelope(record))
            .await?;
        summary.revenues += 1;
    }
    for record in &bundle.deleted_invoices {
        engine
            .save_record(Collection::DeletedInvoices, db::strip_envelope(record))
            .await?;
        summary.deleted_invoices += 1;
    }

    info!(
        products = summary.products,
        sales = summary.sales,
        "store import complete"
    );
    Ok(summary)
}
