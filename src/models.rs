//! Typed record schemas for every collection.
//!
//! The web app let raw SDK documents flow straight into templates; here each
//! collection has an explicit shape, and field maps are validated before they
//! reach either store. Records travel between modules as `serde_json::Value`
//! field maps (the document model), with these structs as the typed view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::{value_f64, value_i64, value_str};

/// Sale payment states derived from paid vs subtotal.
pub const STATUS_PAID: &str = "paid";
pub const STATUS_PARTIAL: &str = "partial";
pub const STATUS_UNPAID: &str = "unpaid";

/// The collections a store owns, locally and remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Products,
    Categories,
    Sales,
    Expenses,
    Revenues,
    DeletedInvoices,
}

impl Collection {
    pub const ALL: &'static [Collection] = &[
        Collection::Products,
        Collection::Categories,
        Collection::Sales,
        Collection::Expenses,
        Collection::Revenues,
        Collection::DeletedInvoices,
    ];

    /// Local SQLite table name.
    pub fn table(self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Categories => "categories",
            Collection::Sales => "sales",
            Collection::Expenses => "expenses",
            Collection::Revenues => "revenues",
            Collection::DeletedInvoices => "deleted_invoices",
        }
    }

    /// Collection id on the sync backend (matches the hosted schema, which
    /// kept the original camelCase name for deleted invoices).
    pub fn wire(self) -> &'static str {
        match self {
            Collection::DeletedInvoices => "deletedInvoices",
            other => other.table(),
        }
    }

    pub fn parse(raw: &str) -> Option<Collection> {
        match raw {
            "products" => Some(Collection::Products),
            "categories" => Some(Collection::Categories),
            "sales" | "invoices" => Some(Collection::Sales),
            "expenses" => Some(Collection::Expenses),
            "revenues" => Some(Collection::Revenues),
            "deleted_invoices" | "deletedInvoices" => Some(Collection::DeletedInvoices),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub wholesale_price: f64,
    pub price: f64,
    pub quantity: i64,
    #[serde(default)]
    pub min_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
}

/// One line of a sale, snapshotting the product at sale time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    #[serde(default)]
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub invoice_number: String,
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub sale_date: String,
    pub products_sold: Vec<SaleLine>,
    pub subtotal: f64,
    pub paid_amount: f64,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub description: String,
    pub amount: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revenue {
    pub description: String,
    pub amount: f64,
    pub date: String,
}

/// A soft-deleted sale, parked for the admin restore flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedInvoice {
    #[serde(flatten)]
    pub sale: Sale,
    pub deleted_at: String,
}

/// Derive the payment status of a sale from the amounts.
pub fn payment_status(subtotal: f64, paid_amount: f64) -> &'static str {
    if paid_amount <= 0.0 {
        STATUS_UNPAID
    } else if paid_amount < subtotal {
        STATUS_PARTIAL
    } else {
        STATUS_PAID
    }
}

// ---------------------------------------------------------------------------
// Boundary validation
// ---------------------------------------------------------------------------

/// Validate a full field map before it is written anywhere.
pub fn validate(collection: Collection, fields: &Value) -> Result<()> {
    if !fields.is_object() {
        return Err(Error::Validation("record fields must be a JSON object".into()));
    }
    match collection {
        Collection::Products => {
            require_str(fields, "name")?;
            let price = require_number(fields, "price")?;
            if price < 0.0 {
                return Err(Error::Validation("price must not be negative".into()));
            }
            require_integer(fields, "quantity")?;
        }
        Collection::Categories => {
            require_str(fields, "name")?;
        }
        Collection::Sales => {
            require_str(fields, "customer_name")?;
            require_str(fields, "sale_date")?;
            let subtotal = require_number(fields, "subtotal")?;
            if subtotal <= 0.0 {
                return Err(Error::Validation("subtotal must be greater than zero".into()));
            }
            let paid = require_number(fields, "paid_amount")?;
            if paid < 0.0 {
                return Err(Error::Validation("paid_amount must not be negative".into()));
            }
            let lines = fields
                .get("products_sold")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::Validation("sale needs a products_sold array".into()))?;
            if lines.is_empty() {
                return Err(Error::Validation("sale needs at least one product".into()));
            }
        }
        Collection::Expenses | Collection::Revenues => {
            require_str(fields, "description")?;
            let amount = require_number(fields, "amount")?;
            if amount <= 0.0 {
                return Err(Error::Validation("amount must be greater than zero".into()));
            }
            require_str(fields, "date")?;
        }
        Collection::DeletedInvoices => {
            require_str(fields, "invoice_number")?;
            require_str(fields, "customer_name")?;
        }
    }
    Ok(())
}

/// Validate a partial update. Only the fields present are checked; unknown
/// fields pass through untouched.
pub fn validate_patch(_collection: Collection, patch: &Value) -> Result<()> {
    let Some(obj) = patch.as_object() else {
        return Err(Error::Validation("update fields must be a JSON object".into()));
    };
    for (key, value) in obj {
        match key.as_str() {
            "name" | "description" | "customer_name" | "sale_date" | "date"
            | "invoice_number" => {
                if value.as_str().map(str::trim).filter(|s| !s.is_empty()).is_none() {
                    return Err(Error::Validation(format!("{key} must be a non-empty string")));
                }
            }
            "price" | "wholesale_price" | "paid_amount" => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| Error::Validation(format!("{key} must be a number")))?;
                if n < 0.0 {
                    return Err(Error::Validation(format!("{key} must not be negative")));
                }
            }
            "amount" | "subtotal" => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| Error::Validation(format!("{key} must be a number")))?;
                if n <= 0.0 {
                    return Err(Error::Validation(format!("{key} must be greater than zero")));
                }
            }
            "quantity" | "min_stock" => {
                if value.as_i64().is_none() {
                    return Err(Error::Validation(format!("{key} must be an integer")));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn require_str(fields: &Value, key: &str) -> Result<String> {
    value_str(fields, &[key])
        .ok_or_else(|| Error::Validation(format!("missing required field: {key}")))
}

fn require_number(fields: &Value, key: &str) -> Result<f64> {
    value_f64(fields, &[key])
        .ok_or_else(|| Error::Validation(format!("missing or non-numeric field: {key}")))
}

fn require_integer(fields: &Value, key: &str) -> Result<i64> {
    value_i64(fields, &[key])
        .ok_or_else(|| Error::Validation(format!("missing or non-integer field: {key}")))
}
