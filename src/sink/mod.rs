//! Buffered persistence of validated records and validation errors.
//!
//! [`BatchSink`] owns the pending buffers for one batch, flushing each
//! collection in capped bulk inserts with exponential-backoff retries, and
//! upserting the progress snapshot on every flush. After a flush fails for
//! good the sink refuses further input for the batch.

pub mod retry;

use std::sync::Arc;

use chrono::Utc;
use mongodb::bson::Document;
use tracing::debug;

use crate::model::{BatchProgress, ShipmentRecord, ValidationError};
use crate::store::{Store, StoreError, BATCHES, ERRORS, SHIPMENTS};
use retry::with_retry;

/// Buffered items per collection before a flush is forced.
pub const BATCH_CAPACITY: usize = 500;

pub struct BatchSink {
    store: Arc<dyn Store>,
    records: Vec<ShipmentRecord>,
    errors: Vec<ValidationError>,
    failed: bool,
}

impl BatchSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        BatchSink {
            store,
            records: Vec::new(),
            errors: Vec::new(),
            failed: false,
        }
    }

    /// Whether a flush has failed terminally for this batch.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Buffers a validated record; flushes when the buffer is full.
    pub async fn accept_record(
        &mut self,
        record: ShipmentRecord,
        progress: &BatchProgress,
    ) -> Result<(), StoreError> {
        self.check_alive()?;
        self.records.push(record);
        if self.records.len() >= BATCH_CAPACITY {
            self.flush(progress).await?;
        }
        Ok(())
    }

    /// Buffers a validation error; flushes when the buffer is full.
    pub async fn accept_error(
        &mut self,
        error: ValidationError,
        progress: &BatchProgress,
    ) -> Result<(), StoreError> {
        self.check_alive()?;
        self.errors.push(error);
        if self.errors.len() >= BATCH_CAPACITY {
            self.flush(progress).await?;
        }
        Ok(())
    }

    /// Flushes both buffers and upserts the progress snapshot. Called on
    /// the capacity trigger and at end-of-stream.
    pub async fn flush(&mut self, progress: &BatchProgress) -> Result<(), StoreError> {
        self.check_alive()?;

        if let Err(error) = self.flush_inner(progress).await {
            self.failed = true;
            return Err(error);
        }
        Ok(())
    }

    /// Upserts the progress snapshot alone, for terminal transitions that
    /// happen outside a data flush.
    pub async fn upsert_progress(&self, progress: &BatchProgress) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let selector = progress.selector();
        let update = progress.to_update_document();
        with_retry("progress upsert", || {
            let store = Arc::clone(&store);
            let selector = selector.clone();
            let update = update.clone();
            async move { store.upsert_one(BATCHES, selector, update).await }
        })
        .await
    }

    fn check_alive(&self) -> Result<(), StoreError> {
        if self.failed {
            return Err(StoreError::permanent(
                "batch sink already failed; rejecting further input",
            ));
        }
        Ok(())
    }

    async fn flush_inner(&mut self, progress: &BatchProgress) -> Result<(), StoreError> {
        if !self.records.is_empty() {
            let inserted_at = Utc::now();
            let docs: Vec<Document> = self
                .records
                .iter()
                .map(|record| record.to_document(inserted_at))
                .collect();
            debug!(count = docs.len(), batch_id = %progress.batch_id, "Flushing records.");
            self.bulk_insert_with_retry(SHIPMENTS, docs).await?;
            self.records.clear();
        }

        if !self.errors.is_empty() {
            let docs: Vec<Document> = self.errors.iter().map(ValidationError::to_document).collect();
            debug!(count = docs.len(), batch_id = %progress.batch_id, "Flushing errors.");
            self.bulk_insert_with_retry(ERRORS, docs).await?;
            self.errors.clear();
        }

        self.upsert_progress(progress).await
    }

    async fn bulk_insert_with_retry(
        &self,
        collection: &'static str,
        docs: Vec<Document>,
    ) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        with_retry("bulk insert", || {
            let store = Arc::clone(&store);
            let docs = docs.clone();
            async move { store.bulk_insert(collection, docs).await }
        })
        .await
    }
}
