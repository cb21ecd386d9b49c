//! Transaction enrichment.
//!
//! Joins each raw transaction against the in-memory customer and product
//! partitions and derives TotalSales. Lookups are key-indexed; duplicate
//! source keys were already resolved at partition load (first record
//! wins), so first-match semantics hold without scanning.

use snafu::prelude::*;

use crate::emit;
use crate::error::{EnrichError, NumericParseSnafu};
use crate::metrics::events::{Dimension, DimensionMiss};
use crate::reference::{CustomerRecord, Partition, ProductRecord};
use crate::source::RawTransaction;

/// Customer attributes copied onto a matched transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerAttributes {
    pub customer_name: Option<String>,
    pub gender: Option<String>,
}

/// Product attributes copied onto a matched transaction, plus the derived
/// total. Keeping `total_sales` inside the match makes "TotalSales exists
/// iff the product matched" structural rather than a convention.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductAttributes {
    pub product_name: Option<String>,
    pub product_price: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_id: Option<String>,
    pub store_id: Option<String>,
    pub store_name: Option<String>,
    /// QuantityOrdered x productPrice.
    pub total_sales: f64,
}

/// A transaction after enrichment, ready for the fact table.
///
/// The original stream fields are always intact; joined attributes are
/// present only for the dimensions that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTransaction {
    pub order_id: String,
    pub order_date: String,
    pub product_id: String,
    pub quantity_ordered: String,
    pub customer_id: String,
    pub time_id: String,
    pub customer: Option<CustomerAttributes>,
    pub product: Option<ProductAttributes>,
}

/// Joins transactions against the loaded reference partitions.
///
/// Holds both partitions read-only for the lifetime of a run; enrichment
/// never mutates them, so the engine can be shared across worker threads.
pub struct EnrichmentEngine {
    customers: Partition<CustomerRecord>,
    products: Partition<ProductRecord>,
}

impl EnrichmentEngine {
    /// Create an engine over fully loaded partitions.
    pub fn new(customers: Partition<CustomerRecord>, products: Partition<ProductRecord>) -> Self {
        Self {
            customers,
            products,
        }
    }

    /// Enrich one transaction.
    ///
    /// A miss on either dimension is not an error; the record passes
    /// through with those attributes absent. A product match with a
    /// non-numeric price (or quantity) is fatal: totals are never
    /// silently defaulted.
    pub fn enrich(&self, txn: RawTransaction) -> Result<EnrichedTransaction, EnrichError> {
        let customer = self
            .customers
            .get(&txn.customer_id)
            .map(|record| CustomerAttributes {
                customer_name: record.customer_name.clone(),
                gender: record.gender.clone(),
            });

        let product = match self.products.get(&txn.product_id) {
            Some(record) => Some(derive_product(record, &txn)?),
            None => None,
        };

        if customer.is_none() {
            emit!(DimensionMiss {
                dimension: Dimension::Customer
            });
        }
        if product.is_none() {
            emit!(DimensionMiss {
                dimension: Dimension::Product
            });
        }

        Ok(EnrichedTransaction {
            order_id: txn.order_id,
            order_date: txn.order_date,
            product_id: txn.product_id,
            quantity_ordered: txn.quantity_ordered,
            customer_id: txn.customer_id,
            time_id: txn.time_id,
            customer,
            product,
        })
    }
}

/// Copy product attributes and compute the total for a matched product.
fn derive_product(
    record: &ProductRecord,
    txn: &RawTransaction,
) -> Result<ProductAttributes, EnrichError> {
    let quantity = parse_operand(&txn.quantity_ordered, "QuantityOrdered", &txn.order_id)?;
    // A matched product with no usable price is corrupt reference data
    let price_text = record.product_price.as_deref().unwrap_or("");
    let price = parse_operand(price_text, "productPrice", &txn.order_id)?;

    Ok(ProductAttributes {
        product_name: record.product_name.clone(),
        product_price: record.product_price.clone(),
        supplier_name: record.supplier_name.clone(),
        supplier_id: record.supplier_id.clone(),
        store_id: record.store_id.clone(),
        store_name: record.store_name.clone(),
        total_sales: quantity * price,
    })
}

fn parse_operand(value: &str, field: &'static str, order_id: &str) -> Result<f64, EnrichError> {
    value.trim().parse::<f64>().context(NumericParseSnafu {
        order_id,
        field,
        value,
    })
}
