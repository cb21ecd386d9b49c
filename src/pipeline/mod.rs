//! The enrichment pipeline.
//!
//! Connects the reference partitions, transaction stream, enrichment
//! engine, and fact sink into a batch pipeline with graceful shutdown.
//!
//! # Architecture
//!
//! The whole run executes on Tokio's blocking thread pool; the async
//! shell only hosts the signal handler and the metrics endpoint. With
//! `enrich_workers > 1` the run fans records out across scoped worker
//! threads while reads and writes stay single-threaded.

mod signal;

use snafu::prelude::*;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, MalformedPolicy};
use crate::dlq::{DeadLetterQueue, SkipTracker};
use crate::emit;
use crate::enrich::{EnrichedTransaction, EnrichmentEngine};
use crate::error::{
    DlqSnafu, EnrichSnafu, PipelineError, ReferenceSnafu, SinkSnafu, StreamError, StreamSnafu,
    TaskJoinSnafu, WorkerPanicSnafu, WriteSnafu,
};
use crate::metrics::events::{RecordsEnriched, RecordsRead};
use crate::reference::{CustomerRecord, ProductRecord, SqliteReferenceStore, load_partition};
use crate::sink::{BatchWriter, SqliteFactSink};
use crate::source::{RawTransaction, TransactionReader};

/// Bound on in-flight records between pipeline stages.
const CHANNEL_CAPACITY: usize = 1024;

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Well-formed records consumed from the source.
    pub records_read: usize,
    /// Malformed records dropped under the skip policy.
    pub records_skipped: usize,
    /// Records that completed enrichment.
    pub records_enriched: usize,
    /// Records with no customer match.
    pub customer_misses: usize,
    /// Records with no product match.
    pub product_misses: usize,
    /// Duplicate reference keys dropped at partition load.
    pub duplicate_keys: usize,
    /// Records persisted to the fact table.
    pub records_written: usize,
    /// Batches committed to the sink.
    pub batches_flushed: usize,
    /// Whether a shutdown signal cut the run short.
    pub interrupted: bool,
}

/// One configured enrichment run.
pub struct Pipeline {
    config: Config,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Pair a configuration with the shutdown token the run will poll.
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Run the pipeline to completion on the blocking thread pool.
    pub async fn run(self) -> Result<PipelineStats, PipelineError> {
        tokio::task::spawn_blocking(move || self.run_blocking())
            .await
            .context(TaskJoinSnafu)?
    }

    fn run_blocking(&self) -> Result<PipelineStats, PipelineError> {
        info!("Pipeline starting");

        let (engine, duplicate_keys) = self.load_references()?;

        let reader = TransactionReader::open(&self.config.transactions).context(StreamSnafu)?;
        let sink = SqliteFactSink::from_config(&self.config.sink).context(SinkSnafu)?;
        let writer = BatchWriter::new(
            sink,
            self.config.sink.batch_size,
            self.config.sink.flush_retries,
        );

        let dlq = DeadLetterQueue::from_config(&self.config.error_handling).context(DlqSnafu)?;
        let mut tracker = SkipTracker::new(self.config.error_handling.max_skipped, dlq);

        let workers = self.config.transactions.enrich_workers;
        let outcome = if workers > 1 {
            self.run_parallel(&engine, reader, writer, &mut tracker, workers)
        } else {
            self.run_serial(&engine, reader, writer, &mut tracker)
        };
        tracker.finalize_dlq();

        let mut stats = outcome?;
        stats.duplicate_keys = duplicate_keys;
        if stats.interrupted {
            warn!("Pipeline interrupted, buffered records were flushed before exit");
        }
        info!(
            records_read = stats.records_read,
            records_skipped = stats.records_skipped,
            records_enriched = stats.records_enriched,
            customer_misses = stats.customer_misses,
            product_misses = stats.product_misses,
            duplicate_keys = stats.duplicate_keys,
            records_written = stats.records_written,
            batches_flushed = stats.batches_flushed,
            "Pipeline completed"
        );
        Ok(stats)
    }

    /// Load both reference partitions up front. The store closes as soon
    /// as loading ends; lookups run against the in-memory partitions.
    /// Also reports how many duplicate keys the loads dropped.
    fn load_references(&self) -> Result<(EnrichmentEngine, usize), PipelineError> {
        let reference = &self.config.reference;
        let store = SqliteReferenceStore::open(&reference.database).context(ReferenceSnafu)?;
        let customers = load_partition::<CustomerRecord>(&store, &reference.customer_partition)
            .context(ReferenceSnafu)?;
        let products = load_partition::<ProductRecord>(&store, &reference.product_partition)
            .context(ReferenceSnafu)?;
        let duplicates = customers.duplicate_keys() + products.duplicate_keys();
        Ok((EnrichmentEngine::new(customers, products), duplicates))
    }

    fn run_serial(
        &self,
        engine: &EnrichmentEngine,
        reader: TransactionReader,
        mut writer: BatchWriter<SqliteFactSink>,
        tracker: &mut SkipTracker,
    ) -> Result<PipelineStats, PipelineError> {
        let mut stats = PipelineStats::default();

        for result in reader {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, stopping reads");
                stats.interrupted = true;
                break;
            }
            let Some(raw) = self.next_record(result, tracker, &mut stats)? else {
                continue;
            };
            let enriched = engine.enrich(raw).context(EnrichSnafu)?;
            observe_enriched(&enriched, &mut stats);
            writer.add(enriched).context(WriteSnafu)?;
        }

        let writer_stats = writer.finish().context(WriteSnafu)?;
        stats.records_written = writer_stats.records_written;
        stats.batches_flushed = writer_stats.batches_flushed;
        stats.records_skipped = tracker.count();
        Ok(stats)
    }

    /// Fan enrichment out across scoped worker threads.
    ///
    /// The reader stays on this thread so the skip policy and budget
    /// apply in input order; a dedicated writer thread keeps batch
    /// boundaries deterministic by arrival order.
    fn run_parallel(
        &self,
        engine: &EnrichmentEngine,
        reader: TransactionReader,
        writer: BatchWriter<SqliteFactSink>,
        tracker: &mut SkipTracker,
        workers: usize,
    ) -> Result<PipelineStats, PipelineError> {
        let mut stats = PipelineStats::default();

        let (raw_tx, raw_rx) = mpsc::sync_channel::<RawTransaction>(CHANNEL_CAPACITY);
        let (enriched_tx, enriched_rx) =
            mpsc::sync_channel::<EnrichedTransaction>(CHANNEL_CAPACITY);
        let raw_rx = Arc::new(Mutex::new(raw_rx));

        let (read_result, worker_results, writer_outcome) = thread::scope(|scope| {
            let writer_handle = scope.spawn(move || {
                let mut writer = writer;
                let mut local = PipelineStats::default();
                for enriched in enriched_rx {
                    observe_enriched(&enriched, &mut local);
                    writer.add(enriched).context(WriteSnafu)?;
                }
                Ok::<_, PipelineError>((writer, local))
            });

            let worker_handles: Vec<_> = (0..workers)
                .map(|_| {
                    let raw_rx = Arc::clone(&raw_rx);
                    let enriched_tx = enriched_tx.clone();
                    scope.spawn(move || {
                        loop {
                            let received = match raw_rx.lock() {
                                Ok(rx) => rx.recv(),
                                Err(_) => break,
                            };
                            let Ok(raw) = received else { break };
                            let enriched = engine.enrich(raw).context(EnrichSnafu)?;
                            // A closed channel means the writer stopped;
                            // its error is the one worth reporting.
                            if enriched_tx.send(enriched).is_err() {
                                break;
                            }
                        }
                        Ok::<_, PipelineError>(())
                    })
                })
                .collect();
            // Workers hold the remaining handles; dropping ours lets the
            // channels close once they exit.
            drop(raw_rx);
            drop(enriched_tx);

            let read_result = (|| -> Result<(), PipelineError> {
                for result in reader {
                    if self.shutdown.is_cancelled() {
                        info!("Shutdown requested, stopping reads");
                        stats.interrupted = true;
                        break;
                    }
                    let Some(raw) = self.next_record(result, tracker, &mut stats)? else {
                        continue;
                    };
                    if raw_tx.send(raw).is_err() {
                        break;
                    }
                }
                Ok(())
            })();
            drop(raw_tx);

            let worker_results: Vec<Result<(), PipelineError>> = worker_handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(_) => WorkerPanicSnafu.fail(),
                })
                .collect();

            let writer_outcome = match writer_handle.join() {
                Ok(result) => result,
                Err(_) => WorkerPanicSnafu.fail(),
            };

            (read_result, worker_results, writer_outcome)
        });

        read_result?;
        for result in worker_results {
            result?;
        }
        // The tail batch only persists when every stage drained cleanly.
        let (writer, enriched_stats) = writer_outcome?;
        let writer_stats = writer.finish().context(WriteSnafu)?;

        stats.records_enriched = enriched_stats.records_enriched;
        stats.customer_misses = enriched_stats.customer_misses;
        stats.product_misses = enriched_stats.product_misses;
        stats.records_written = writer_stats.records_written;
        stats.batches_flushed = writer_stats.batches_flushed;
        stats.records_skipped = tracker.count();
        Ok(stats)
    }

    /// Apply the malformed-record policy to one read result.
    ///
    /// Returns `Ok(None)` when a malformed record was skipped.
    fn next_record(
        &self,
        result: Result<RawTransaction, StreamError>,
        tracker: &mut SkipTracker,
        stats: &mut PipelineStats,
    ) -> Result<Option<RawTransaction>, PipelineError> {
        match result {
            Ok(raw) => {
                stats.records_read += 1;
                emit!(RecordsRead { count: 1 });
                Ok(Some(raw))
            }
            Err(StreamError::MalformedRecord { line, reason })
                if self.config.transactions.on_malformed == MalformedPolicy::Skip =>
            {
                tracker.record_skip(&self.config.transactions.path, line, &reason)?;
                Ok(None)
            }
            Err(e) => Err(e).context(StreamSnafu),
        }
    }
}

fn observe_enriched(enriched: &EnrichedTransaction, stats: &mut PipelineStats) {
    if enriched.customer.is_none() {
        stats.customer_misses += 1;
    }
    if enriched.product.is_none() {
        stats.product_misses += 1;
    }
    stats.records_enriched += 1;
    emit!(RecordsEnriched { count: 1 });
}

/// Run one enrichment pass over the configured source.
///
/// Installs the signal listener, so a SIGINT mid-run flushes what is
/// buffered and returns stats with `interrupted` set.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    Pipeline::new(config, shutdown).run().await
}
