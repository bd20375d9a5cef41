//! Core data types shared across the ingest pipeline and the query surface.

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of bytes of an offending value retained in a
/// [`ValidationError`]. Longer values are truncated on a UTF-8 boundary.
pub const MAX_ERROR_VALUE_BYTES: usize = 1024;

/// Identifier of one upload. All documents produced by an ingest carry it as
/// their foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generates a fresh identifier (36-char hyphenated UUID v4).
    pub fn generate() -> Self {
        BatchId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One shipment row, parsed from the upload in the fixed column order
/// `tracking_number, origin, destination, weight_kg, length_cm, width_cm,
/// height_cm, ship_date, status`.
///
/// A record that reaches the store has passed validation; `status` is
/// lowercased before persisting. Dimensions absent from the source row are
/// zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub tracking_number: String,
    pub origin: String,
    pub destination: String,
    pub weight_kg: f64,
    pub length_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
    pub ship_date: String,
    pub status: String,
    /// 1-based position within the file, excluding the header row.
    pub row_number: u32,
    pub batch_id: String,
}

impl ShipmentRecord {
    /// Renders the stored document shape, stamping `inserted_at`.
    pub fn to_document(&self, inserted_at: DateTime<Utc>) -> Document {
        doc! {
            "batch_id": &self.batch_id,
            "tracking_number": &self.tracking_number,
            "origin": &self.origin,
            "destination": &self.destination,
            "weight_kg": self.weight_kg,
            "length_cm": self.length_cm,
            "width_cm": self.width_cm,
            "height_cm": self.height_cm,
            "ship_date": &self.ship_date,
            "status": &self.status,
            "row_number": self.row_number as i32,
            "inserted_at": mongodb::bson::DateTime::from_millis(inserted_at.timestamp_millis()),
        }
    }
}

/// Why a row was rejected. At most one error is recorded per failing row;
/// the first failing constraint wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub row_number: u32,
    /// Field that failed, or `"(row)"` for structural (parse-level) failures.
    pub field: &'static str,
    pub expected: &'static str,
    pub actual: String,
    pub batch_id: String,
}

impl ValidationError {
    pub fn new(
        row_number: u32,
        field: &'static str,
        expected: &'static str,
        actual: impl Into<String>,
        batch_id: impl Into<String>,
    ) -> Self {
        ValidationError {
            row_number,
            field,
            expected,
            actual: truncate_bytes(actual.into(), MAX_ERROR_VALUE_BYTES),
            batch_id: batch_id.into(),
        }
    }

    pub fn to_document(&self) -> Document {
        doc! {
            "batch_id": &self.batch_id,
            "row_number": self.row_number as i32,
            "field": self.field,
            "expected": self.expected,
            "actual": &self.actual,
        }
    }
}

/// Lifecycle of one batch. Persisted integer-encoded; transitions are
/// monotone along the ordinal order, with `Failed` reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum BatchStatus {
    Uploading = 0,
    Parsing = 1,
    Validating = 2,
    Inserting = 3,
    Complete = 4,
    Failed = 5,
}

impl BatchStatus {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Complete | BatchStatus::Failed)
    }
}

/// Counters and lifecycle status for one batch, upserted to the `batches`
/// collection on every flush and on terminal transitions.
///
/// Invariant: `processed_rows == valid_rows + invalid_rows` at every
/// snapshot. `total_rows` mirrors `processed_rows` until end-of-stream; the
/// row count of the file is only known then.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub batch_id: String,
    pub total_rows: u32,
    pub processed_rows: u32,
    pub valid_rows: u32,
    pub invalid_rows: u32,
    pub status: BatchStatus,
    pub start_time: DateTime<Utc>,
}

impl BatchProgress {
    pub fn new(batch_id: impl Into<String>) -> Self {
        BatchProgress {
            batch_id: batch_id.into(),
            total_rows: 0,
            processed_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            status: BatchStatus::Uploading,
            start_time: Utc::now(),
        }
    }

    /// Upsert selector for this batch's progress document.
    pub fn selector(&self) -> Document {
        doc! { "batch_id": &self.batch_id }
    }

    /// `$set` update carrying the current snapshot.
    pub fn to_update_document(&self) -> Document {
        doc! {
            "$set": {
                "batch_id": &self.batch_id,
                "total_rows": self.total_rows as i32,
                "processed_rows": self.processed_rows as i32,
                "valid_rows": self.valid_rows as i32,
                "invalid_rows": self.invalid_rows as i32,
                "status": self.status.as_i32(),
                "start_time": mongodb::bson::DateTime::from_millis(self.start_time.timestamp_millis()),
            }
        }
    }
}

/// Truncates to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_bytes(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s
}
