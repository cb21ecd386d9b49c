//! SQLite fact-table sink.
//!
//! Each batch runs as one SQL transaction: a prepared insert executes per
//! record and the batch commits as a unit, so a failed batch leaves no
//! partial rows behind.

use rusqlite::{Connection, params};
use snafu::prelude::*;
use tracing::debug;

use super::{FACT_COLUMNS, FactSink};
use crate::config::SinkConfig;
use crate::enrich::EnrichedTransaction;
use crate::error::{
    BeginTransactionSnafu, CommitSnafu, CreateTableSnafu, InsertSnafu, OpenSinkSnafu, SinkError,
};

/// Writes enriched transactions into a SQLite star-schema fact table.
pub struct SqliteFactSink {
    conn: Connection,
    table: String,
    insert_sql: String,
}

impl SqliteFactSink {
    /// Open (or create) the sink database and prepare the fact table.
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let conn = Connection::open(&config.database).context(OpenSinkSnafu {
            path: &config.database,
        })?;
        let sink = Self {
            conn,
            table: config.fact_table.clone(),
            insert_sql: insert_sql(&config.fact_table),
        };
        if config.create_table {
            sink.ensure_table()?;
        }
        debug!(database = %config.database, table = %config.fact_table, "Opened fact sink");
        Ok(sink)
    }

    /// Create the fact table if it does not exist yet.
    ///
    /// All stream and attribute columns stay TEXT so values survive
    /// verbatim; only the derived TotalSales measure is numeric.
    fn ensure_table(&self) -> Result<(), SinkError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                Order_ID TEXT,
                Order_Date TEXT,
                ProductID TEXT,
                Quantity_Ordered TEXT,
                customer_id TEXT,
                time_id TEXT,
                customer_name TEXT,
                gender TEXT,
                productName TEXT,
                productPrice TEXT,
                supplierName TEXT,
                storeID TEXT,
                storeName TEXT,
                supplierID TEXT,
                TotalSales REAL
            )",
            quote_ident(&self.table)
        );
        self.conn
            .execute_batch(&ddl)
            .context(CreateTableSnafu { table: &self.table })
    }
}

impl FactSink for SqliteFactSink {
    fn write_batch(&mut self, records: &[EnrichedTransaction]) -> Result<(), SinkError> {
        let tx = self
            .conn
            .transaction()
            .context(BeginTransactionSnafu)?;
        {
            let mut stmt = tx
                .prepare_cached(&self.insert_sql)
                .context(InsertSnafu { table: &self.table })?;
            for record in records {
                let customer = record.customer.as_ref();
                let product = record.product.as_ref();
                stmt.execute(params![
                    record.order_id,
                    record.order_date,
                    record.product_id,
                    record.quantity_ordered,
                    record.customer_id,
                    record.time_id,
                    customer.and_then(|c| c.customer_name.as_deref()),
                    customer.and_then(|c| c.gender.as_deref()),
                    product.and_then(|p| p.product_name.as_deref()),
                    product.and_then(|p| p.product_price.as_deref()),
                    product.and_then(|p| p.supplier_name.as_deref()),
                    product.and_then(|p| p.store_id.as_deref()),
                    product.and_then(|p| p.store_name.as_deref()),
                    product.and_then(|p| p.supplier_id.as_deref()),
                    product.map(|p| p.total_sales),
                ])
                .context(InsertSnafu { table: &self.table })?;
            }
        }
        tx.commit().context(CommitSnafu)?;
        Ok(())
    }
}

fn insert_sql(table: &str) -> String {
    let columns = FACT_COLUMNS.join(", ");
    let placeholders = vec!["?"; FACT_COLUMNS.len()].join(", ");
    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        quote_ident(table)
    )
}

/// Quote a SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
