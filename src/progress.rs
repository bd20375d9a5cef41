//! In-memory progress bookkeeping for one active ingest.

use crate::model::{BatchProgress, BatchStatus};

/// Holds the live [`BatchProgress`] for a batch being ingested. Counter
/// updates happen synchronously after each parsed row; status moves only
/// forward along the lifecycle, with `Failed` reachable from any
/// non-terminal state.
#[derive(Debug)]
pub struct ProgressTracker {
    progress: BatchProgress,
}

impl ProgressTracker {
    pub fn new(batch_id: impl Into<String>) -> Self {
        ProgressTracker {
            progress: BatchProgress::new(batch_id),
        }
    }

    pub fn snapshot(&self) -> &BatchProgress {
        &self.progress
    }

    pub fn status(&self) -> BatchStatus {
        self.progress.status
    }

    /// Counts one row that passed validation. `total_rows` tracks
    /// `processed_rows` until end-of-stream, when the file's row count
    /// becomes known.
    pub fn record_valid(&mut self) {
        self.progress.processed_rows += 1;
        self.progress.valid_rows += 1;
        self.progress.total_rows = self.progress.processed_rows;
    }

    /// Counts one row rejected by a structural or semantic check.
    pub fn record_invalid(&mut self) {
        self.progress.processed_rows += 1;
        self.progress.invalid_rows += 1;
        self.progress.total_rows = self.progress.processed_rows;
    }

    /// Moves the status forward. Backward moves and moves out of a terminal
    /// state are ignored, keeping the lifecycle monotone.
    pub fn advance(&mut self, status: BatchStatus) {
        if self.progress.status.is_terminal() || status <= self.progress.status {
            return;
        }
        self.progress.status = status;
    }

    /// Terminal failure, from any non-terminal state.
    pub fn fail(&mut self) {
        if !self.progress.status.is_terminal() {
            self.progress.status = BatchStatus::Failed;
        }
    }
}
