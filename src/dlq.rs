//! Dead letter queue for malformed transaction records.
//!
//! Records rejected under the skip policy are quarantined as NDJSON for
//! later inspection and replay. Each run writes a fresh timestamped file
//! under the configured directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::ErrorHandlingConfig;
use crate::emit;
use crate::error::{
    DlqError, DlqOpenSnafu, DlqSerializeSnafu, DlqWriteSnafu, MaxSkippedExceededSnafu,
    PipelineError,
};
use crate::metrics::events::RecordsSkipped;

/// A transaction record rejected by the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Source file the record came from.
    pub path: String,
    /// 1-based line number within the source file.
    pub line: u64,
    /// Why the record was rejected.
    pub reason: String,
    /// Timestamp when the rejection was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Dead letter queue for rejected records.
///
/// Appends one NDJSON line per rejected record to a per-run file.
pub struct DeadLetterQueue {
    path: PathBuf,
    writer: BufWriter<File>,
    recorded: usize,
}

impl DeadLetterQueue {
    /// Open the queue described by the error-handling section.
    ///
    /// Returns `None` when no path is configured, which disables
    /// quarantine entirely.
    pub fn from_config(config: &ErrorHandlingConfig) -> Result<Option<Self>, DlqError> {
        let Some(dlq_path) = &config.dlq_path else {
            return Ok(None);
        };

        fs::create_dir_all(dlq_path).context(DlqOpenSnafu { path: dlq_path })?;

        // One file per run, stamped so reruns never clobber each other
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = Path::new(dlq_path).join(format!("rejected-{timestamp}.ndjson"));
        let file = File::create(&path).context(DlqOpenSnafu {
            path: path.display().to_string(),
        })?;

        info!("DLQ enabled: {}", path.display());

        Ok(Some(Self {
            path,
            writer: BufWriter::new(file),
            recorded: 0,
        }))
    }

    /// Quarantine one rejected record.
    pub fn record(&mut self, path: &str, line: u64, reason: &str) -> Result<(), DlqError> {
        let rejected = RejectedRecord {
            path: path.to_string(),
            line,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };

        debug!("Recording DLQ rejection: line {} ({})", line, reason);

        let json = serde_json::to_string(&rejected).context(DlqSerializeSnafu)?;
        self.writer.write_all(json.as_bytes()).context(DlqWriteSnafu)?;
        self.writer.write_all(b"\n").context(DlqWriteSnafu)?;
        self.recorded += 1;
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<(), DlqError> {
        self.writer.flush().context(DlqWriteSnafu)
    }

    /// Number of records quarantined so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Finalize the DLQ, flushing any remaining lines.
    pub fn finalize(mut self) -> Result<usize, DlqError> {
        self.flush()?;
        info!(
            "DLQ finalized: {} rejected records in {}",
            self.recorded,
            self.path.display()
        );
        Ok(self.recorded)
    }
}

/// Tracks skipped records and enforces the skip budget.
pub struct SkipTracker {
    count: usize,
    max_skipped: usize,
    dlq: Option<DeadLetterQueue>,
}

impl SkipTracker {
    /// Create a new skip tracker.
    ///
    /// # Arguments
    /// * `max_skipped` - Skips tolerated before aborting (0 = unlimited)
    /// * `dlq` - Optional quarantine for rejected records
    pub fn new(max_skipped: usize, dlq: Option<DeadLetterQueue>) -> Self {
        Self {
            count: 0,
            max_skipped,
            dlq,
        }
    }

    /// Record a skipped record, quarantine it, and check the skip budget.
    ///
    /// Returns `Err` once the budget is exhausted (after finalizing the
    /// DLQ so already-quarantined records are not lost).
    pub fn record_skip(
        &mut self,
        path: &str,
        line: u64,
        reason: &str,
    ) -> Result<(), PipelineError> {
        self.count += 1;
        warn!(line, reason, "Skipping malformed record");
        emit!(RecordsSkipped { count: 1 });

        if let Some(dlq) = &mut self.dlq
            && let Err(e) = dlq.record(path, line, reason)
        {
            error!("Failed to record DLQ rejection: {}", e);
        }

        if self.max_skipped > 0 && self.count >= self.max_skipped {
            error!("Skip limit ({}) reached, stopping pipeline", self.count);
            self.finalize_dlq();
            return MaxSkippedExceededSnafu { count: self.count }.fail();
        }

        Ok(())
    }

    /// Finalize the DLQ, logging any errors.
    pub fn finalize_dlq(&mut self) {
        if let Some(dlq) = self.dlq.take()
            && let Err(e) = dlq.finalize()
        {
            error!("Could not flush the DLQ file: {}", e);
        }
    }

    /// Returns true if any records were skipped.
    pub fn has_skips(&self) -> bool {
        self.count > 0
    }

    /// Returns the skipped record count.
    pub fn count(&self) -> usize {
        self.count
    }
}
