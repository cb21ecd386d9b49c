//! Reference (dimension) data loading.
//!
//! Each dimension partition is loaded whole into memory once per run and
//! served through a key index. Whole-partition loading is the deliberate
//! scaling limit of this pipeline: partition size is bounded by memory,
//! and there is no pagination or eviction.

mod records;
mod store;

pub use records::{CustomerRecord, DimensionRecord, ProductRecord};
pub use store::{PartitionRows, ReferenceStore, SqliteReferenceStore};

use indexmap::IndexMap;
use snafu::prelude::*;
use std::time::Instant;
use tracing::{info, warn};

use crate::emit;
use crate::error::{ReferenceError, SchemaMismatchSnafu};
use crate::metrics::events::{DuplicateReferenceKeys, PartitionLoaded};

/// An immutable, key-indexed dimension partition.
///
/// The index preserves insertion order, so when the source lists the same
/// key more than once the first record wins and later ones are dropped.
/// Duplicates are counted and surfaced as a data-quality warning, never an
/// error.
#[derive(Debug)]
pub struct Partition<R> {
    records: IndexMap<String, R>,
    duplicate_keys: usize,
}

impl<R: DimensionRecord> Partition<R> {
    /// Build a partition from raw store output.
    ///
    /// Fails with [`ReferenceError::SchemaMismatch`] if the key column or
    /// any declared attribute column is absent; unknown columns are
    /// dropped. Rows whose key is NULL can never be matched and are
    /// skipped with a warning.
    pub fn from_rows(name: &str, data: PartitionRows) -> Result<Self, ReferenceError> {
        let key_idx = column_index(&data.columns, R::KEY_COLUMN).context(SchemaMismatchSnafu {
            partition: name,
            column: R::KEY_COLUMN,
        })?;

        let mut attribute_indexes = Vec::with_capacity(R::ATTRIBUTE_COLUMNS.len());
        for column in R::ATTRIBUTE_COLUMNS {
            let idx = column_index(&data.columns, column).context(SchemaMismatchSnafu {
                partition: name,
                column: *column,
            })?;
            attribute_indexes.push(idx);
        }

        let mut records: IndexMap<String, R> = IndexMap::with_capacity(data.rows.len());
        let mut duplicate_keys = 0usize;
        let mut null_keys = 0usize;

        for mut row in data.rows {
            let Some(key) = row[key_idx].take() else {
                null_keys += 1;
                continue;
            };
            if records.contains_key(&key) {
                duplicate_keys += 1;
                continue;
            }
            let attributes = attribute_indexes.iter().map(|&idx| row[idx].take()).collect();
            records.insert(key.clone(), R::from_row(key, attributes));
        }

        if duplicate_keys > 0 {
            warn!(
                partition = name,
                duplicates = duplicate_keys,
                "Duplicate reference keys dropped (first record wins)"
            );
            emit!(DuplicateReferenceKeys {
                partition: name.to_string(),
                count: duplicate_keys as u64,
            });
        }
        if null_keys > 0 {
            warn!(
                partition = name,
                rows = null_keys,
                "Dropped reference rows with NULL key"
            );
        }

        Ok(Self {
            records,
            duplicate_keys,
        })
    }

    /// Look up a record by join key.
    pub fn get(&self, key: &str) -> Option<&R> {
        self.records.get(key)
    }

    /// Number of distinct keys in the partition.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the partition holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of duplicate-key rows dropped during load.
    pub fn duplicate_keys(&self) -> usize {
        self.duplicate_keys
    }
}

fn column_index(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c == name)
}

/// Load one partition from the store into a typed, key-indexed form.
pub fn load_partition<R: DimensionRecord>(
    store: &dyn ReferenceStore,
    name: &str,
) -> Result<Partition<R>, ReferenceError> {
    let start = Instant::now();
    let data = store.fetch_all(name)?;
    let partition = Partition::from_rows(name, data)?;

    emit!(PartitionLoaded {
        partition: name.to_string(),
        records: partition.len(),
        duration: start.elapsed(),
    });
    info!(
        partition = name,
        records = partition.len(),
        "Loaded reference partition"
    );

    Ok(partition)
}
