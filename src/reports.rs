//! Dashboard statistics and date-range reports, computed from the local
//! store (the read source of truth, available offline).

use serde::Serialize;
use std::collections::HashMap;

use crate::api::RemoteStore;
use crate::error::Result;
use crate::models::{Collection, STATUS_PAID, STATUS_PARTIAL, STATUS_UNPAID};
use crate::storage::CredentialStore;
use crate::sync::SyncEngine;
use crate::{value_f64, value_i64, value_str};

/// Dashboard counters.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct Statistics {
    pub total_products: usize,
    pub total_invoices: usize,
    pub total_revenue: f64,
    pub paid_invoices: usize,
    pub partial_invoices: usize,
    pub unpaid_invoices: usize,
    pub total_expenses: f64,
    pub other_revenues: f64,
    pub pending_changes: i64,
    pub average_invoice_value: f64,
}

/// Aggregate the dashboard counters for the current store.
pub fn statistics<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
) -> Result<Statistics> {
    let sales = engine.list_records(Collection::Sales)?;
    let products = engine.list_records(Collection::Products)?;
    let expenses = engine.list_records(Collection::Expenses)?;
    let revenues = engine.list_records(Collection::Revenues)?;

    let total_revenue: f64 = sales
        .iter()
        .filter_map(|sale| value_f64(sale, &["subtotal"]))
        .sum();
    let count_status = |status: &str| {
        sales
            .iter()
            .filter(|sale| value_str(sale, &["status"]).as_deref() == Some(status))
            .count()
    };

    Ok(Statistics {
        total_products: products.len(),
        total_invoices: sales.len(),
        total_revenue,
        paid_invoices: count_status(STATUS_PAID),
        partial_invoices: count_status(STATUS_PARTIAL),
        unpaid_invoices: count_status(STATUS_UNPAID),
        total_expenses: expenses
            .iter()
            .filter_map(|e| value_f64(e, &["amount"]))
            .sum(),
        other_revenues: revenues
            .iter()
            .filter_map(|r| value_f64(r, &["amount"]))
            .sum(),
        pending_changes: engine.pending_count()?,
        average_invoice_value: if sales.is_empty() {
            0.0
        } else {
            total_revenue / sales.len() as f64
        },
    })
}

/// Inclusive date-range filter. Dates are `YYYY-MM-DD` strings, so the
/// comparison is lexicographic.
#[derive(Debug, Clone, Default)]
pub struct ReportRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl ReportRange {
    fn contains(&self, date: &str) -> bool {
        if let Some(start) = self.start.as_deref() {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end.as_deref() {
            if date > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ProductQuantity {
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CategoryAmount {
    pub name: String,
    pub amount: f64,
}

/// A period report over sales, expenses, and revenues.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub total_sales: f64,
    pub total_expenses: f64,
    pub total_revenues: f64,
    pub net_profit: f64,
    pub top_products: Vec<ProductQuantity>,
    pub category_sales: Vec<CategoryAmount>,
}

const TOP_PRODUCTS_LIMIT: usize = 5;
const UNCATEGORIZED: &str = "Uncategorized";

/// Build a report for the given period. Sales count toward profit alongside
/// other revenues.
pub fn build_report<R: RemoteStore, C: CredentialStore>(
    engine: &SyncEngine<R, C>,
    range: &ReportRange,
) -> Result<Report> {
    let sales: Vec<_> = engine
        .list_records(Collection::Sales)?
        .into_iter()
        .filter(|sale| {
            value_str(sale, &["sale_date"]).map(|d| range.contains(&d)).unwrap_or(false)
        })
        .collect();
    let expenses: Vec<_> = engine
        .list_records(Collection::Expenses)?
        .into_iter()
        .filter(|e| value_str(e, &["date"]).map(|d| range.contains(&d)).unwrap_or(false))
        .collect();
    let revenues: Vec<_> = engine
        .list_records(Collection::Revenues)?
        .into_iter()
        .filter(|r| value_str(r, &["date"]).map(|d| range.contains(&d)).unwrap_or(false))
        .collect();

    let total_sales: f64 = sales.iter().filter_map(|s| value_f64(s, &["subtotal"])).sum();
    let total_expenses: f64 = expenses.iter().filter_map(|e| value_f64(e, &["amount"])).sum();
    let total_revenues: f64 = revenues.iter().filter_map(|r| value_f64(r, &["amount"])).sum();

    // Product name -> category name, via the product's category_id
    let products = engine.list_records(Collection::Products)?;
    let categories = engine.list_records(Collection::Categories)?;
    let category_names: HashMap<String, String> = categories
        .iter()
        .filter_map(|c| {
            Some((value_str(c, &["id"])?, value_str(c, &["name"])?))
        })
        .collect();
    let product_category: HashMap<String, String> = products
        .iter()
        .filter_map(|p| {
            let id = value_str(p, &["id"])?;
            let category = value_str(p, &["category_id"])
                .and_then(|cid| category_names.get(&cid).cloned())
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            Some((id, category))
        })
        .collect();

    let mut quantity_by_product: HashMap<String, i64> = HashMap::new();
    let mut amount_by_category: HashMap<String, f64> = HashMap::new();
    for sale in &sales {
        let Some(lines) = sale.get("products_sold").and_then(|v| v.as_array()) else {
            continue;
        };
        for line in lines {
            let name = value_str(line, &["name"]).unwrap_or_default();
            let quantity = value_i64(line, &["quantity"]).unwrap_or(0);
            let price = value_f64(line, &["price"]).unwrap_or(0.0);
            *quantity_by_product.entry(name).or_insert(0) += quantity;

            let category = value_str(line, &["product_id"])
                .and_then(|pid| product_category.get(&pid).cloned())
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            *amount_by_category.entry(category).or_insert(0.0) += quantity as f64 * price;
        }
    }

    let mut top_products: Vec<ProductQuantity> = quantity_by_product
        .into_iter()
        .map(|(name, quantity)| ProductQuantity { name, quantity })
        .collect();
    top_products.sort_by(|a, b| b.quantity.cmp(&a.quantity).then(a.name.cmp(&b.name)));
    top_products.truncate(TOP_PRODUCTS_LIMIT);

    let mut category_sales: Vec<CategoryAmount> = amount_by_category
        .into_iter()
        .map(|(name, amount)| CategoryAmount { name, amount })
        .collect();
    category_sales.sort_by(|a, b| {
        b.amount.partial_cmp(&a.amount).unwrap_or(std::cmp::Ordering::Equal).then(a.name.cmp(&b.name))
    });

    Ok(Report {
        total_sales,
        total_expenses,
        total_revenues,
        net_profit: total_revenues + total_sales - total_expenses,
        top_products,
        category_sales,
    })
}
