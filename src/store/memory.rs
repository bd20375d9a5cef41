//! In-memory [`Store`] used by the test suite and store-less local runs.
//!
//! Supports exactly the filter surface the service emits: top-level
//! equality, `$and`/`$or` composition and case-insensitive `$regex`
//! matching. Bulk-insert failures can be scripted to exercise the retry
//! path.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use futures::stream;
use mongodb::bson::{Bson, Document};
use regex::RegexBuilder;

use super::{DocumentStream, FindOpts, Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    bulk_failures: Mutex<VecDeque<StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors returned by the next bulk inserts, in order, before
    /// inserts succeed again.
    pub fn fail_next_bulk_inserts(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.bulk_failures.lock().unwrap().extend(errors);
    }

    /// Snapshot of one collection's documents, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => as_filters(condition)
            .iter()
            .all(|clause| matches(doc, clause)),
        "$or" => as_filters(condition)
            .iter()
            .any(|clause| matches(doc, clause)),
        field => match condition {
            Bson::Document(inner) if inner.contains_key("$regex") => {
                regex_matches(inner, doc.get(field))
            }
            expected => doc.get(field) == Some(expected),
        },
    })
}

fn as_filters(condition: &Bson) -> Vec<&Document> {
    match condition {
        Bson::Array(clauses) => clauses.iter().filter_map(Bson::as_document).collect(),
        _ => Vec::new(),
    }
}

fn regex_matches(condition: &Document, value: Option<&Bson>) -> bool {
    let Some(pattern) = condition.get_str("$regex").ok() else {
        return false;
    };
    let case_insensitive = condition
        .get_str("$options")
        .map(|options| options.contains('i'))
        .unwrap_or(false);
    let Ok(regex) = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
    else {
        return false;
    };
    match value {
        Some(Bson::String(s)) => regex.is_match(s),
        _ => false,
    }
}

fn compare(a: &Bson, b: &Bson) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn numeric(bson: &Bson) -> Option<f64> {
        match bson {
            Bson::Int32(n) => Some(f64::from(*n)),
            Bson::Int64(n) => Some(*n as f64),
            Bson::Double(n) => Some(*n),
            _ => None,
        }
    }

    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a, b) {
            (Bson::String(x), Bson::String(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn bulk_insert(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError> {
        if let Some(error) = self.bulk_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_owned())
            .or_default()
            .extend(docs);
        Ok(())
    }

    async fn upsert_one(
        &self,
        collection: &str,
        selector: Document,
        update: Document,
    ) -> Result<(), StoreError> {
        let set = update
            .get_document("$set")
            .cloned()
            .map_err(|_| StoreError::permanent("upsert update must carry a $set document"))?;

        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();

        if let Some(existing) = docs.iter_mut().find(|doc| matches(doc, &selector)) {
            existing.extend(set);
        } else {
            let mut fresh = selector;
            fresh.extend(set);
            docs.push(fresh);
        }
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        opts: FindOpts,
    ) -> Result<DocumentStream, StoreError> {
        let mut selected: Vec<Document> = self
            .documents(collection)
            .into_iter()
            .filter(|doc| matches(doc, &filter))
            .collect();

        let (sort_field, direction) = match &opts.sort {
            Some((field, direction)) => (field.clone(), *direction),
            None => ("row_number".to_owned(), 1),
        };
        selected.sort_by(|a, b| {
            let ordering = compare(
                a.get(&sort_field).unwrap_or(&Bson::Null),
                b.get(&sort_field).unwrap_or(&Bson::Null),
            );
            if direction < 0 {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let selected = selected.into_iter().skip(opts.skip as usize);
        let selected: Vec<_> = if opts.limit > 0 {
            selected.take(opts.limit as usize).collect()
        } else {
            selected.collect()
        };

        Ok(Box::pin(stream::iter(selected.into_iter().map(Ok))))
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !matches(doc, &filter));
        Ok((before - docs.len()) as u64)
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{records_filter, BATCHES};
    use futures::StreamExt;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let store = MemoryStore::new();
        let selector = doc! { "batch_id": "b1" };

        store
            .upsert_one(BATCHES, selector.clone(), doc! { "$set": { "status": 0 } })
            .await
            .unwrap();
        store
            .upsert_one(BATCHES, selector, doc! { "$set": { "status": 4 } })
            .await
            .unwrap();

        let docs = store.documents(BATCHES);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_i32("status").unwrap(), 4);
    }

    #[tokio::test]
    async fn find_applies_filter_sort_skip_and_limit() {
        let store = MemoryStore::new();
        store
            .bulk_insert(
                "shipments",
                vec![
                    doc! { "batch_id": "b1", "row_number": 3, "origin": "Rotterdam" },
                    doc! { "batch_id": "b1", "row_number": 1, "origin": "Hamburg" },
                    doc! { "batch_id": "b2", "row_number": 2, "origin": "Rotterdam" },
                ],
            )
            .await
            .unwrap();

        let docs: Vec<_> = store
            .find(
                "shipments",
                records_filter(Some("b1"), None),
                FindOpts::default(),
            )
            .await
            .unwrap()
            .collect()
            .await;
        let rows: Vec<i32> = docs
            .into_iter()
            .map(|doc| doc.unwrap().get_i32("row_number").unwrap())
            .collect();
        assert_eq!(rows, vec![1, 3]);

        let found: Vec<_> = store
            .find(
                "shipments",
                records_filter(Some("b1"), Some("ROTTER")),
                FindOpts::default(),
            )
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn scripted_bulk_failures_pop_in_order() {
        let store = MemoryStore::new();
        store.fail_next_bulk_inserts([StoreError::retryable("boom")]);

        let docs = vec![doc! { "batch_id": "b1" }];
        assert!(store.bulk_insert("shipments", docs.clone()).await.is_err());
        assert!(store.bulk_insert("shipments", docs).await.is_ok());
        assert_eq!(store.documents("shipments").len(), 1);
    }
}
