//! Batched, insert-or-ignore loading of dispatch rows

use tracing::debug;

use crate::errors::DispatchError;
use crate::models::DispatchRow;

/// Default number of rows per insert
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Destination for batches of rows
///
/// One call is one insert statement and one commit. Rows whose
/// `event_number` already exists are skipped by the sink; the return value
/// is the number of rows actually inserted.
#[allow(async_fn_in_trait)]
pub trait RowSink {
    async fn insert_batch(&mut self, rows: &[DispatchRow]) -> Result<u64, DispatchError>;
}

/// Running totals for one loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub submitted: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub flushes: u64,
}

/// Buffers rows and hands them to a [`RowSink`] in groups of `batch_size`
pub struct BatchLoader<'a, S: RowSink> {
    sink: &'a mut S,
    batch_size: usize,
    buffer: Vec<DispatchRow>,
    stats: LoaderStats,
}

impl<'a, S: RowSink> BatchLoader<'a, S> {
    pub fn new(sink: &'a mut S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: LoaderStats::default(),
        }
    }

    /// Buffer a row, flushing as soon as the batch is full
    pub async fn add(&mut self, row: DispatchRow) -> Result<(), DispatchError> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Insert whatever is buffered. An empty buffer issues no insert.
    ///
    /// The buffer is cleared even when the insert fails; those rows are lost.
    pub async fn flush(&mut self) -> Result<(), DispatchError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.buffer);
        self.buffer.reserve(self.batch_size);

        let inserted = self.sink.insert_batch(&batch).await?;
        let submitted = batch.len() as u64;

        self.stats.flushes += 1;
        self.stats.submitted += submitted;
        self.stats.inserted += inserted;
        self.stats.duplicates += submitted.saturating_sub(inserted);

        debug!(
            rows = submitted,
            inserted,
            "Flushed batch {}",
            self.stats.flushes
        );
        Ok(())
    }

    /// Rows waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;

    use super::*;

    /// In-memory sink with insert-or-ignore semantics on `event_number`
    #[derive(Debug, Default)]
    pub struct MemorySink {
        pub rows: Vec<DispatchRow>,
        pub batches: Vec<usize>,
        pub fail: bool,
        pub keys: HashSet<String>,
    }

    impl RowSink for MemorySink {
        async fn insert_batch(&mut self, rows: &[DispatchRow]) -> Result<u64, DispatchError> {
            if self.fail {
                return Err(DispatchError::StorageWriteError {
                    rows: rows.len(),
                    source: sqlx::Error::PoolClosed,
                });
            }
            self.batches.push(rows.len());
            let mut inserted = 0;
            for row in rows {
                if self.keys.insert(row.event_number.clone()) {
                    self.rows.push(row.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
    }
}
