//! Sale completion: turn a cart into an invoice and adjust inventory.
//!
//! Each step goes through the reconciliation engine, so a sale completed
//! offline queues its invoice and every stock adjustment for replay.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::RemoteStore;
use crate::error::{Error, Result};
use crate::models::{self, Collection, Sale, SaleLine};
use crate::storage::CredentialStore;
use crate::sync::SyncEngine;
use crate::value_i64;

/// One cart line selected for sale.
#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub price: f64,
}

/// User input for a sale, before invoice number and status are assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct SaleDraft {
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub sale_date: String,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<CartLine>,
}

/// Complete a sale: validate the draft, assign an invoice number, derive the
/// payment status, save the invoice, and decrement sold product quantities.
/// Returns the invoice's local id.
pub async fn complete_sale<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
    draft: SaleDraft,
) -> Result<String> {
    if draft.lines.is_empty() {
        return Err(Error::Validation("add products to the invoice first".into()));
    }
    if draft.customer_name.trim().is_empty() {
        return Err(Error::Validation("customer name is required".into()));
    }
    if draft.sale_date.trim().is_empty() {
        return Err(Error::Validation("sale date is required".into()));
    }
    for line in &draft.lines {
        if line.quantity <= 0 {
            return Err(Error::Validation(format!(
                "quantity for {} must be greater than zero",
                line.name
            )));
        }
    }

    let subtotal: f64 = draft
        .lines
        .iter()
        .map(|line| line.quantity as f64 * line.price)
        .sum();
    if subtotal <= 0.0 {
        return Err(Error::Validation("invoice total must be greater than zero".into()));
    }
    if draft.paid_amount < 0.0 {
        return Err(Error::Validation("paid amount must not be negative".into()));
    }

    let invoice_number = engine.next_invoice_number()?;
    let status = models::payment_status(subtotal, draft.paid_amount);

    let sale = Sale {
        invoice_number,
        customer_name: draft.customer_name.trim().to_string(),
        customer_phone: draft.customer_phone.clone(),
        sale_date: draft.sale_date.clone(),
        products_sold: draft
            .lines
            .iter()
            .map(|line| SaleLine {
                product_id: Some(line.product_id.clone()),
                name: line.name.clone(),
                quantity: line.quantity,
                price: line.price,
            })
            .collect(),
        subtotal,
        paid_amount: draft.paid_amount,
        status: status.to_string(),
        notes: draft.notes.clone(),
    };

    let fields = serde_json::to_value(&sale)
        .map_err(|e| Error::Validation(format!("serialize sale: {e}")))?;
    let sale_id = engine.save_record(Collection::Sales, fields).await?;

    // Each decrement is its own reconciled mutation; a missing product does
    // not undo the sale.
    for line in &draft.lines {
        match engine.get_record(Collection::Products, &line.product_id)? {
            Some(product) => {
                let current = value_i64(&product, &["quantity"]).unwrap_or(0);
                let remaining = current - line.quantity;
                engine
                    .update_record(
                        Collection::Products,
                        &line.product_id,
                        json!({ "quantity": remaining }),
                    )
                    .await?;
            }
            None => {
                warn!(product_id = %line.product_id, "sold product not found; stock not adjusted");
            }
        }
    }

    info!(%sale_id, invoice = %sale.invoice_number, subtotal, "sale completed");
    Ok(sale_id)
}
