//! Transaction stream source.
//!
//! Provides a lazy, forward-only reader over the transaction CSV file,
//! with optional decompression. The stream is not restartable; re-reading
//! requires reopening.

pub mod reader;

pub use reader::{RawTransaction, TransactionReader};
