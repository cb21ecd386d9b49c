//! starling: A library for enriching sales transactions into a star-schema
//! fact table.
//!
//! This library provides components for streaming CSV transaction records,
//! joining in-memory customer and product reference partitions loaded from
//! SQLite, deriving the TotalSales measure, and batch-writing enriched rows
//! to a fact table.
//!
//! # Example
//!
//! ```ignore
//! use starling::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Wrote {} enriched records", stats.records_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dlq;
pub mod enrich;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reference;
pub mod sink;
pub mod source;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
