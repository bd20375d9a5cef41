//! Per-upload ingest pipeline.
//!
//! One [`IngestPipeline`] exists per upload request and owns the whole
//! staged flow for its batch: frame decoding, record parsing, validation,
//! the buffered sink and the progress tracker. Within a batch everything is
//! strictly sequential; concurrent uploads each hold their own pipeline and
//! share nothing but the store.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use snafu::Snafu;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::decoding::{parse_record, CsvFrameDecoder, FrameError};
use crate::model::{BatchId, BatchProgress, BatchStatus, ValidationError};
use crate::progress::ProgressTracker;
use crate::sink::BatchSink;
use crate::store::{Store, StoreError, BATCHES};
use crate::validate::validate;

#[derive(Debug, Snafu)]
pub enum IngestError {
    /// The first logical row could not be framed; there is nothing to
    /// ingest. Maps to a client error upstream.
    #[snafu(display("the header row is unparseable"))]
    MalformedHeader,
    #[snafu(display("store failure during ingest: {source}"))]
    Store { source: StoreError },
}

pub struct IngestPipeline {
    batch_id: BatchId,
    decoder: CsvFrameDecoder,
    buf: BytesMut,
    sink: BatchSink,
    tracker: ProgressTracker,
    store: Arc<dyn Store>,
    /// Current row number; 0 until the header has been consumed.
    row: u32,
    header_seen: bool,
    /// Whether a terminal progress state has been persisted. Guards the
    /// disconnect cleanup in `Drop`.
    settled: bool,
}

impl IngestPipeline {
    /// Allocates a batch identifier and registers the batch as uploading.
    pub async fn start(store: Arc<dyn Store>) -> Result<Self, StoreError> {
        let batch_id = BatchId::generate();
        let tracker = ProgressTracker::new(batch_id.as_str());
        let sink = BatchSink::new(Arc::clone(&store));
        sink.upsert_progress(tracker.snapshot()).await?;
        info!(batch_id = %batch_id, "Accepted upload.");

        Ok(IngestPipeline {
            batch_id,
            decoder: CsvFrameDecoder::new(),
            buf: BytesMut::new(),
            sink,
            tracker,
            store,
            row: 0,
            header_seen: false,
            settled: false,
        })
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Feeds one chunk of upload bytes through the pipeline, emitting every
    /// record that completes inside it.
    pub async fn feed(&mut self, chunk: &[u8]) -> Result<(), IngestError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tracker.advance(BatchStatus::Parsing);
        self.buf.extend_from_slice(chunk);

        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(frame)) => self.handle_frame(frame).await?,
                Ok(None) => break,
                Err(error) => self.handle_frame_error(error).await?,
            }
        }
        Ok(())
    }

    /// Signals end-of-stream: drains the decoder, flushes the sink and
    /// settles the batch as complete. Returns the final progress snapshot.
    pub async fn finish(mut self) -> Result<BatchProgress, IngestError> {
        loop {
            match self.decoder.decode_eof(&mut self.buf) {
                Ok(Some(frame)) => self.handle_frame(frame).await?,
                Ok(None) => break,
                Err(error) => self.handle_frame_error(error).await?,
            }
        }

        self.tracker.advance(BatchStatus::Inserting);
        if let Err(error) = self.sink.flush(self.tracker.snapshot()).await {
            self.settle_failed().await;
            return Err(IngestError::Store { source: error });
        }

        self.tracker.advance(BatchStatus::Complete);
        if let Err(error) = self.sink.upsert_progress(self.tracker.snapshot()).await {
            self.settle_failed().await;
            return Err(IngestError::Store { source: error });
        }
        self.settled = true;

        let progress = self.tracker.snapshot().clone();
        info!(
            batch_id = %self.batch_id,
            total_rows = progress.total_rows,
            valid_rows = progress.valid_rows,
            invalid_rows = progress.invalid_rows,
            "Ingest complete.",
        );
        Ok(progress)
    }

    async fn handle_frame(&mut self, frame: Bytes) -> Result<(), IngestError> {
        if !self.header_seen {
            // Row 0; never emitted as a record.
            self.header_seen = true;
            debug!(batch_id = %self.batch_id, "Consumed header row.");
            return Ok(());
        }
        self.row += 1;
        if frame.is_empty() {
            // Blank lines keep their row number but carry no record.
            return Ok(());
        }

        match parse_record(&frame, self.row, self.batch_id.as_str()) {
            Ok(record) => match validate(&record) {
                Ok(()) => {
                    let mut record = record;
                    record.status.make_ascii_lowercase();
                    self.tracker.record_valid();
                    if let Err(error) = self
                        .sink
                        .accept_record(record, self.tracker.snapshot())
                        .await
                    {
                        self.settle_failed().await;
                        return Err(IngestError::Store { source: error });
                    }
                }
                Err(validation_error) => {
                    self.tracker.record_invalid();
                    self.accept_error(validation_error).await?;
                }
            },
            Err(record_error) => {
                self.tracker.record_invalid();
                let error = ValidationError::new(
                    self.row,
                    "(row)",
                    record_error.expected(),
                    String::from_utf8_lossy(&frame).into_owned(),
                    self.batch_id.as_str(),
                );
                self.accept_error(error).await?;
            }
        }
        Ok(())
    }

    async fn handle_frame_error(&mut self, error: FrameError) -> Result<(), IngestError> {
        if !self.header_seen {
            warn!(batch_id = %self.batch_id, %error, "Header row unparseable; aborting upload.");
            self.settle_failed().await;
            return Err(IngestError::MalformedHeader);
        }

        // The offending line was dropped by the decoder; the row number is
        // still consumed.
        self.row += 1;
        self.tracker.record_invalid();
        let error = ValidationError::new(
            self.row,
            "(row)",
            "line within 4096 bytes",
            String::new(),
            self.batch_id.as_str(),
        );
        self.accept_error(error).await
    }

    async fn accept_error(&mut self, error: ValidationError) -> Result<(), IngestError> {
        if let Err(store_error) = self.sink.accept_error(error, self.tracker.snapshot()).await {
            self.settle_failed().await;
            return Err(IngestError::Store {
                source: store_error,
            });
        }
        Ok(())
    }

    /// Persists the failed state and marks the batch settled so the drop
    /// guard stays quiet.
    async fn settle_failed(&mut self) {
        self.tracker.fail();
        if let Err(error) = self.sink.upsert_progress(self.tracker.snapshot()).await {
            warn!(batch_id = %self.batch_id, %error, "Could not record batch failure.");
        }
        self.settled = true;
    }
}

impl Drop for IngestPipeline {
    /// A pipeline dropped before settling means the upload ended without
    /// end-of-input (client disconnect or worker fault). The batch must not
    /// be left dangling in a non-terminal state.
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(batch_id = %self.batch_id, "Upload dropped mid-stream; marking batch failed.");

        let store = Arc::clone(&self.store);
        let mut progress = self.tracker.snapshot().clone();
        if !progress.status.is_terminal() {
            progress.status = BatchStatus::Failed;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let selector = progress.selector();
                let update = progress.to_update_document();
                if let Err(error) = store.upsert_one(BATCHES, selector, update).await {
                    warn!(%error, "Could not record batch failure after disconnect.");
                }
            });
        }
    }
}
