//! Admin flow: soft delete and restore of invoices.
//!
//! Deleting a sale never destroys it outright; the invoice is parked in
//! `deleted_invoices` with a deletion timestamp, where an admin can find and
//! restore it. Both directions run through the reconciliation engine, so
//! they sync like any other mutation.

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::api::RemoteStore;
use crate::db;
use crate::error::{Error, Result};
use crate::models::Collection;
use crate::storage::CredentialStore;
use crate::sync::SyncEngine;
use crate::value_str;

/// Soft-delete a sale: snapshot it into `deleted_invoices`, then remove it
/// from `sales`. Returns the deleted-invoice record's local id.
pub async fn delete_sale<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
    sale_id: &str,
) -> Result<String> {
    let sale = engine
        .get_record(Collection::Sales, sale_id)?
        .ok_or_else(|| Error::Validation(format!("no sale with id {sale_id}")))?;

    let mut snapshot = db::strip_envelope(&sale);
    if let Some(obj) = snapshot.as_object_mut() {
        obj.insert("deleted_at".into(), Value::String(Utc::now().to_rfc3339()));
    }

    // Park the snapshot first so a failure cannot lose the invoice.
    let deleted_id = engine.save_record(Collection::DeletedInvoices, snapshot).await?;
    engine.delete_record(Collection::Sales, sale_id).await?;

    info!(%sale_id, %deleted_id, "invoice soft-deleted");
    Ok(deleted_id)
}

/// Restore a soft-deleted invoice back into `sales`. Returns the restored
/// sale's local id.
pub async fn restore_invoice<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
    deleted_id: &str,
) -> Result<String> {
    let invoice = engine
        .get_record(Collection::DeletedInvoices, deleted_id)?
        .ok_or_else(|| Error::Validation(format!("no deleted invoice with id {deleted_id}")))?;

    let mut fields = db::strip_envelope(&invoice);
    if let Some(obj) = fields.as_object_mut() {
        obj.remove("deleted_at");
    }

    let sale_id = engine.save_record(Collection::Sales, fields).await?;
    engine.delete_record(Collection::DeletedInvoices, deleted_id).await?;

    info!(%deleted_id, %sale_id, "invoice restored");
    Ok(sale_id)
}

/// All soft-deleted invoices for the current store.
pub fn list_deleted_invoices<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
) -> Result<Vec<Value>> {
    engine.list_records(Collection::DeletedInvoices)
}

/// Filter deleted invoices by invoice number or customer name.
pub fn search_deleted_invoices<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
    term: &str,
) -> Result<Vec<Value>> {
    let needle = term.trim().to_lowercase();
    let invoices = list_deleted_invoices(engine)?;
    if needle.is_empty() {
        return Ok(invoices);
    }
    Ok(invoices
        .into_iter()
        .filter(|invoice| {
            let number = value_str(invoice, &["invoice_number"]).unwrap_or_default();
            let customer = value_str(invoice, &["customer_name"]).unwrap_or_default();
            number.to_lowercase().contains(&needle) || customer.to_lowercase().contains(&needle)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{logged_in_engine, MockRemoteStore, STORE};
    use serde_json::json;

    async fn engine_with_sale() -> (
        SyncEngine<MockRemoteStore, crate::testutil::MemoryCredentialStore>,
        String,
    ) {
        let engine = logged_in_engine(MockRemoteStore::new());
        let sale_id = engine
            .save_record(
                Collection::Sales,
                json!({
                    "invoice_number": "INV-01052024-00001",
                    "customer_name": "Ali",
                    "sale_date": "2024-05-01",
                    "subtotal": 100.0,
                    "paid_amount": 100.0,
                    "status": "paid",
                    "products_sold": [{"name": "Mug", "quantity": 2, "price": 50.0}]
                }),
            )
            .await
            .unwrap();
        (engine, sale_id)
    }

    #[tokio::test]
    async fn test_soft_delete_parks_invoice() {
        let (engine, sale_id) = engine_with_sale().await;

        let deleted_id = delete_sale(&engine, &sale_id).await.unwrap();

        assert!(engine.get_record(Collection::Sales, &sale_id).unwrap().is_none());
        let parked = engine
            .get_record(Collection::DeletedInvoices, &deleted_id)
            .unwrap()
            .unwrap();
        assert_eq!(parked["invoice_number"], "INV-01052024-00001");
        assert!(parked["deleted_at"].as_str().is_some());

        // Remotely the sale is gone and the deleted snapshot exists
        assert!(engine.remote().docs_in(STORE, Collection::Sales).is_empty());
        assert_eq!(engine.remote().docs_in(STORE, Collection::DeletedInvoices).len(), 1);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let (engine, sale_id) = engine_with_sale().await;
        let deleted_id = delete_sale(&engine, &sale_id).await.unwrap();

        let restored_id = restore_invoice(&engine, &deleted_id).await.unwrap();
        assert_ne!(restored_id, sale_id, "restore assigns a fresh local id");

        let restored = engine.get_record(Collection::Sales, &restored_id).unwrap().unwrap();
        assert_eq!(restored["customer_name"], "Ali");
        assert_eq!(restored["subtotal"], 100.0);
        assert!(restored.get("deleted_at").map(Value::is_null).unwrap_or(true));

        assert!(list_deleted_invoices(&engine).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_sale_requires_existing_record() {
        let (engine, _) = engine_with_sale().await;
        assert!(matches!(
            delete_sale(&engine, "missing").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_search_deleted_invoices() {
        let (engine, sale_id) = engine_with_sale().await;
        delete_sale(&engine, &sale_id).await.unwrap();

        assert_eq!(search_deleted_invoices(&engine, "ali").unwrap().len(), 1);
        assert_eq!(search_deleted_invoices(&engine, "INV-0105").unwrap().len(), 1);
        assert_eq!(search_deleted_invoices(&engine, "nobody").unwrap().len(), 0);
        assert_eq!(search_deleted_invoices(&engine, "  ").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_works_offline() {
        let (engine, sale_id) = engine_with_sale().await;
        engine.state().set_online(false);

        let deleted_id = delete_sale(&engine, &sale_id).await.unwrap();

        // One add (deleted snapshot) and one delete (remote sale) queued
        assert_eq!(engine.pending_count().unwrap(), 2);

        engine.network_restored().await.unwrap();
        assert_eq!(engine.pending_count().unwrap(), 0);
        assert!(engine.remote().docs_in(STORE, Collection::Sales).is_empty());
        assert_eq!(engine.remote().docs_in(STORE, Collection::DeletedInvoices).len(), 1);

        let parked = engine
            .get_record(Collection::DeletedInvoices, &deleted_id)
            .unwrap()
            .unwrap();
        assert!(parked["remote_id"].as_str().is_some());
    }
}
