//! Fact-table sink.
//!
//! A [`FactSink`] persists whole batches of enriched transactions; the
//! [`BatchWriter`] in front of it owns the accumulation buffer and the
//! flush policy.

pub mod sqlite;
mod writer;

pub use sqlite::SqliteFactSink;
pub use writer::{BatchWriter, WriterStats};

use crate::enrich::EnrichedTransaction;
use crate::error::SinkError;

/// Fact-table column order. Records bind positionally in exactly this
/// order, so the sink schema and the insert statement stay in lockstep.
pub const FACT_COLUMNS: [&str; 15] = [
    "Order_ID",
    "Order_Date",
    "ProductID",
    "Quantity_Ordered",
    "customer_id",
    "time_id",
    "customer_name",
    "gender",
    "productName",
    "productPrice",
    "supplierName",
    "storeID",
    "storeName",
    "supplierID",
    "TotalSales",
];

/// A destination that persists batches of enriched transactions.
///
/// `write_batch` is all-or-nothing: on error, none of the batch's records
/// may remain persisted. Batches from earlier calls are unaffected either
/// way.
pub trait FactSink: Send {
    fn write_batch(&mut self, records: &[EnrichedTransaction]) -> Result<(), SinkError>;
}
