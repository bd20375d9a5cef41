//! MongoDB-backed [`Store`] implementation.
//!
//! One [`mongodb::Client`] per process; the driver maintains the connection
//! pool internally and cursors keep their pooled connection checked out
//! until they are dropped.

use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::{Client, Database};
use tracing::debug;

use super::{sort_document, DocumentStream, FindOpts, Store, StoreError};
use crate::config::Config;

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Builds the pooled client. Fails only on an unusable connection
    /// string; actual connectivity is established lazily and observable
    /// through [`Store::ping`].
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(&config.mongodb_uri)
            .await
            .map_err(|error| StoreError::permanent(format!("invalid MongoDB URI: {error}")))?;
        debug!(db = %config.mongodb_db, "Constructed MongoDB client.");
        Ok(MongoStore {
            db: client.database(&config.mongodb_db),
        })
    }
}

/// Maps driver errors onto the retry classification: rejections of the
/// request itself are permanent, everything transport-shaped is worth a
/// retry.
fn classify(error: mongodb::error::Error) -> StoreError {
    match error.kind.as_ref() {
        ErrorKind::Authentication { .. }
        | ErrorKind::InvalidArgument { .. }
        | ErrorKind::BsonSerialization(_)
        | ErrorKind::BsonDeserialization(_)
        | ErrorKind::Write(_) => StoreError::permanent(error.to_string()),
        _ => StoreError::retryable(error.to_string()),
    }
}

#[async_trait::async_trait]
impl Store for MongoStore {
    async fn bulk_insert(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError> {
        self.db
            .collection::<Document>(collection)
            .insert_many(docs)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn upsert_one(
        &self,
        collection: &str,
        selector: Document,
        update: Document,
    ) -> Result<(), StoreError> {
        self.db
            .collection::<Document>(collection)
            .update_one(selector, update)
            .upsert(true)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        opts: FindOpts,
    ) -> Result<DocumentStream, StoreError> {
        let coll = self.db.collection::<Document>(collection);
        let mut find = coll
            .find(filter)
            .skip(opts.skip)
            .sort(sort_document(&opts.sort));
        if opts.limit > 0 {
            find = find.limit(opts.limit);
        }

        let cursor = find.await.map_err(classify)?;
        Ok(cursor.map_err(classify).boxed())
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        let result = self
            .db
            .collection::<Document>(collection)
            .delete_many(filter)
            .await
            .map_err(classify)?;
        Ok(result.deleted_count)
    }

    async fn ping(&self) -> bool {
        self.db.run_command(doc! { "ping": 1 }).await.is_ok()
    }
}
