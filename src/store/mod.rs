//! Document-store abstraction.
//!
//! The pipeline and the query surface only ever talk to the [`Store`]
//! trait: collection-level bulk insert, upsert, paginated find,
//! delete-by-filter and a liveness ping. [`mongo::MongoStore`] is the
//! production implementation; [`memory::MemoryStore`] backs tests and
//! store-less local runs.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use futures::stream::BoxStream;
use mongodb::bson::{doc, Bson, Document};
use snafu::Snafu;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Collection holding validated shipment records.
pub const SHIPMENTS: &str = "shipments";
/// Collection holding per-row validation errors.
pub const ERRORS: &str = "errors";
/// Collection holding per-batch progress documents.
pub const BATCHES: &str = "batches";

/// Store failures, classified for the retry policy: transient
/// transport-level trouble is worth retrying, rejections are not.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum StoreError {
    #[snafu(display("retryable store error: {message}"))]
    Retryable { message: String },
    #[snafu(display("permanent store error: {message}"))]
    Permanent { message: String },
}

impl StoreError {
    pub fn retryable(message: impl Into<String>) -> Self {
        StoreError::Retryable {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StoreError::Permanent {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Retryable { .. })
    }
}

/// Cursor over matching documents. The stream owns whatever connection
/// backs it until dropped, so callers control its lifetime explicitly.
pub type DocumentStream = BoxStream<'static, Result<Document, StoreError>>;

/// Options for [`Store::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOpts {
    pub skip: u64,
    /// Maximum number of documents; zero means no limit.
    pub limit: i64,
    /// Sort key and direction (`1` ascending, `-1` descending).
    pub sort: Option<(String, i32)>,
}

impl FindOpts {
    pub fn sorted_by(field: impl Into<String>, direction: i32) -> Self {
        FindOpts {
            sort: Some((field.into(), direction)),
            ..Default::default()
        }
    }
}

/// Collection-level operations the pipeline and readers depend on.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn bulk_insert(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError>;

    async fn upsert_one(
        &self,
        collection: &str,
        selector: Document,
        update: Document,
    ) -> Result<(), StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        opts: FindOpts,
    ) -> Result<DocumentStream, StoreError>;

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, StoreError>;

    async fn ping(&self) -> bool;

    /// First matching document, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        use futures::StreamExt;

        let mut cursor = self
            .find(collection, filter, FindOpts { limit: 1, ..Default::default() })
            .await?;
        cursor.next().await.transpose()
    }
}

/// Filter over shipment records: equality on the batch plus, when a search
/// term is present, a case-insensitive regex OR across the searchable
/// fields.
pub fn records_filter(batch_id: Option<&str>, search: Option<&str>) -> Document {
    const SEARCHABLE: [&str; 4] = ["tracking_number", "origin", "destination", "status"];

    let search_clause = search.filter(|s| !s.is_empty()).map(|term| {
        let alternatives: Vec<Document> = SEARCHABLE
            .iter()
            .map(|field| {
                doc! {
                    *field: {
                        "$regex": term,
                        "$options": "i",
                    }
                }
            })
            .collect();
        doc! { "$or": alternatives }
    });

    match (batch_id, search_clause) {
        (Some(batch), Some(search)) => doc! {
            "$and": [ { "batch_id": batch }, search ],
        },
        (Some(batch), None) => doc! { "batch_id": batch },
        (None, Some(search)) => search,
        (None, None) => Document::new(),
    }
}

/// Equality filter on the batch key, shared by the cascade paths.
pub fn batch_filter(batch_id: &str) -> Document {
    doc! { "batch_id": batch_id }
}

/// Sort document from a `(field, direction)` pair.
pub(crate) fn sort_document(sort: &Option<(String, i32)>) -> Document {
    match sort {
        Some((field, direction)) => doc! { field.as_str(): Bson::Int32(*direction) },
        None => doc! { "row_number": 1 },
    }
}
