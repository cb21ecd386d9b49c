//! Transaction CSV reader.
//!
//! Streams raw sales transactions one record at a time. Schema checks
//! happen here, per record: a malformed record surfaces as an error the
//! caller can absorb or abort on, and the reader stays usable either way.

use flate2::read::GzDecoder;
use snafu::{IntoError, prelude::*};
use std::fs::File;
use std::io::Read;

use crate::config::{CompressionFormat, TransactionConfig};
use crate::error::{MalformedRecordSnafu, OpenSourceSnafu, ReadSnafu, StreamError, ZstdDecoderSnafu};

/// Number of fields in a transaction record.
const TRANSACTION_FIELDS: usize = 6;

/// One raw transaction, parsed but not yet enriched.
///
/// All fields are carried verbatim as text. `quantity_ordered` has been
/// checked numeric at this point; everything else is passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub order_id: String,
    pub order_date: String,
    pub product_id: String,
    pub quantity_ordered: String,
    pub customer_id: String,
    pub time_id: String,
    /// 1-based line number in the source file, for diagnostics.
    pub line: u64,
}

/// A lazy iterator over the transaction stream.
pub struct TransactionReader {
    path: String,
    records: csv::StringRecordsIntoIter<Box<dyn Read + Send>>,
    line: u64,
}

impl TransactionReader {
    /// Open the transaction source described by the configuration.
    pub fn open(config: &TransactionConfig) -> Result<Self, StreamError> {
        let file = File::open(&config.path).context(OpenSourceSnafu { path: &config.path })?;

        let raw: Box<dyn Read + Send> = match config.compression {
            CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
            CompressionFormat::Zstd => Box::new(
                zstd::Decoder::new(file).context(ZstdDecoderSnafu { path: &config.path })?,
            ),
            CompressionFormat::None => Box::new(file),
        };

        // flexible: field-count problems are our MalformedRecord check,
        // not a reader-level failure
        let reader = csv::ReaderBuilder::new()
            .has_headers(config.has_header)
            .flexible(true)
            .from_reader(raw);

        Ok(Self {
            path: config.path.clone(),
            records: reader.into_records(),
            line: if config.has_header { 1 } else { 0 },
        })
    }

    fn parse(&self, record: csv::StringRecord) -> Result<RawTransaction, StreamError> {
        ensure!(
            record.len() == TRANSACTION_FIELDS,
            MalformedRecordSnafu {
                line: self.line,
                reason: format!(
                    "expected {TRANSACTION_FIELDS} fields, found {}",
                    record.len()
                ),
            }
        );

        let quantity = &record[3];
        ensure!(
            quantity.trim().parse::<f64>().is_ok(),
            MalformedRecordSnafu {
                line: self.line,
                reason: format!("QuantityOrdered '{quantity}' is not numeric"),
            }
        );

        Ok(RawTransaction {
            order_id: record[0].to_string(),
            order_date: record[1].to_string(),
            product_id: record[2].to_string(),
            quantity_ordered: record[3].to_string(),
            customer_id: record[4].to_string(),
            time_id: record[5].to_string(),
            line: self.line,
        })
    }
}

impl Iterator for TransactionReader {
    type Item = Result<RawTransaction, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.records.next()? {
            Ok(record) => {
                self.line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(self.line + 1);
                Some(self.parse(record))
            }
            Err(e) => {
                // A bad-encoding line is record data we can skip; anything
                // else is the stream itself failing
                let err = if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) {
                    let line = e.position().map(|p| p.line()).unwrap_or(self.line + 1);
                    MalformedRecordSnafu {
                        line,
                        reason: "invalid UTF-8",
                    }
                    .build()
                } else {
                    ReadSnafu { path: &self.path }.into_error(e)
                };
                Some(Err(err))
            }
        }
    }
}
