//! Request handlers. Every handler maps its own failures onto JSON error
//! replies; rejections are reserved for the routing layer.

use std::convert::Infallible;

use bytes::Buf;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{Bson, Document};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use warp::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use warp::http::{HeaderValue, StatusCode};
use warp::multipart::FormData;
use warp::reply::Response;

use super::{error_reply, json_reply, SharedStore};
use crate::decoding::COLUMNS;
use crate::export::{ExportFormat, ExportReader};
use crate::pipeline::{IngestError, IngestPipeline};
use crate::store::{batch_filter, records_filter, FindOpts, BATCHES, ERRORS, SHIPMENTS};

const DEFAULT_PAGE_LIMIT: i64 = 50;

/// POST /api/upload — streams the multipart `file` part through a fresh
/// ingest pipeline. The batch identifier is returned even when persistence
/// failed, so the client can inspect the failure via the status route.
pub async fn upload(mut form: FormData, store: SharedStore) -> Result<Response, Infallible> {
    let mut pipeline = match IngestPipeline::start(store).await {
        Ok(pipeline) => pipeline,
        Err(error) => {
            warn!(%error, "Could not register upload.");
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not start ingest",
            ));
        }
    };
    let batch_id = pipeline.batch_id().to_string();
    let mut saw_file = false;

    loop {
        let part = match form.try_next().await {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(error) => {
                warn!(%error, %batch_id, "Multipart body ended abnormally.");
                return Ok(error_reply(
                    StatusCode::BAD_REQUEST,
                    "malformed multipart body",
                ));
            }
        };
        if part.name() != "file" {
            continue;
        }
        saw_file = true;

        let mut data = Box::pin(part.stream());
        while let Some(piece) = data.next().await {
            let mut piece = match piece {
                Ok(piece) => piece,
                Err(error) => {
                    warn!(%error, %batch_id, "Upload stream ended abnormally.");
                    return Ok(error_reply(
                        StatusCode::BAD_REQUEST,
                        "malformed multipart body",
                    ));
                }
            };
            while piece.has_remaining() {
                let chunk = piece.chunk();
                let consumed = chunk.len();
                if let Err(error) = pipeline.feed(chunk).await {
                    return Ok(ingest_error_reply(error, &batch_id));
                }
                piece.advance(consumed);
            }
        }
    }

    if !saw_file {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "missing file part"));
    }

    match pipeline.finish().await {
        Ok(_progress) => Ok(json_reply(
            StatusCode::OK,
            &json!({ "batch_id": batch_id, "message": "upload complete" }),
        )),
        Err(error) => Ok(ingest_error_reply(error, &batch_id)),
    }
}

fn ingest_error_reply(error: IngestError, batch_id: &str) -> Response {
    match error {
        IngestError::MalformedHeader => json_reply(
            StatusCode::BAD_REQUEST,
            &json!({ "error": "the header row is unparseable", "batch_id": batch_id }),
        ),
        IngestError::Store { source } => {
            warn!(error = %source, %batch_id, "Ingest failed against the store.");
            json_reply(
                StatusCode::OK,
                &json!({ "batch_id": batch_id, "message": "upload failed; inspect batch status" }),
            )
        }
    }
}

/// GET /api/status/{batch_id}
pub async fn batch_status(batch_id: String, store: SharedStore) -> Result<Response, Infallible> {
    match store.find_one(BATCHES, batch_filter(&batch_id)).await {
        Ok(Some(doc)) => {
            let count = |field: &str| doc.get_i32(field).unwrap_or(0);
            Ok(json_reply(
                StatusCode::OK,
                &json!({
                    "total_rows": count("total_rows"),
                    "processed_rows": count("processed_rows"),
                    "valid_rows": count("valid_rows"),
                    "invalid_rows": count("invalid_rows"),
                    "current_status": count("status"),
                }),
            ))
        }
        Ok(None) => Ok(error_reply(StatusCode::NOT_FOUND, "batch not found")),
        Err(error) => Ok(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            &error.to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    batch_id: Option<String>,
    skip: Option<u64>,
    limit: Option<i64>,
    search: Option<String>,
    sort_by: Option<String>,
}

/// GET /api/records — paginated records of one batch, optionally narrowed
/// by a case-insensitive search over the text fields.
pub async fn records(query: RecordsQuery, store: SharedStore) -> Result<Response, Infallible> {
    let Some(batch_id) = query.batch_id.as_deref() else {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "missing batch_id parameter",
        ));
    };

    // Sorting is restricted to known record fields.
    let sort_field = query
        .sort_by
        .filter(|field| field.as_str() == "row_number" || COLUMNS.contains(&field.as_str()))
        .unwrap_or_else(|| "row_number".to_owned());

    let opts = FindOpts {
        skip: query.skip.unwrap_or(0),
        limit: query.limit.filter(|limit| *limit > 0).unwrap_or(DEFAULT_PAGE_LIMIT),
        sort: Some((sort_field, 1)),
    };
    let filter = records_filter(Some(batch_id), query.search.as_deref());

    collection_reply(&store, SHIPMENTS, filter, opts).await
}

#[derive(Debug, Deserialize)]
pub struct ErrorsQuery {
    batch_id: Option<String>,
}

/// GET /api/errors — all validation errors of one batch, by row number.
pub async fn errors(query: ErrorsQuery, store: SharedStore) -> Result<Response, Infallible> {
    let Some(batch_id) = query.batch_id.as_deref() else {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "missing batch_id parameter",
        ));
    };
    collection_reply(
        &store,
        ERRORS,
        batch_filter(batch_id),
        FindOpts::sorted_by("row_number", 1),
    )
    .await
}

async fn collection_reply(
    store: &SharedStore,
    collection: &str,
    filter: Document,
    opts: FindOpts,
) -> Result<Response, Infallible> {
    let cursor = match store.find(collection, filter, opts).await {
        Ok(cursor) => cursor,
        Err(error) => {
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                &error.to_string(),
            ))
        }
    };
    match cursor.try_collect::<Vec<Document>>().await {
        Ok(docs) => {
            let rendered: Vec<serde_json::Value> = docs
                .into_iter()
                .map(|doc| Bson::Document(doc).into_relaxed_extjson())
                .collect();
            Ok(json_reply(StatusCode::OK, &serde_json::Value::Array(rendered)))
        }
        Err(error) => Ok(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            &error.to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    batch_id: Option<String>,
    format: Option<String>,
}

/// GET /api/export — the batch as a streamed attachment. Back-pressure
/// from the response body propagates into the cursor reads; dropping the
/// response closes the cursor.
pub async fn export(query: ExportQuery, store: SharedStore) -> Result<Response, Infallible> {
    let Some(batch_id) = query.batch_id.as_deref() else {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "missing batch_id parameter",
        ));
    };
    let format = ExportFormat::from_param(query.format.as_deref());

    let reader = match ExportReader::open(&store, batch_id, format).await {
        Ok(reader) => reader,
        Err(error) => {
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                &error.to_string(),
            ))
        }
    };

    let body = warp::hyper::Body::wrap_stream(reader.into_byte_stream());
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    response.headers_mut().insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_static(format.content_disposition()),
    );
    Ok(response)
}

/// DELETE /api/batches/{batch_id} — removes the batch's records, errors
/// and progress document.
pub async fn delete_batch(batch_id: String, store: SharedStore) -> Result<Response, Infallible> {
    for collection in [SHIPMENTS, ERRORS, BATCHES] {
        if let Err(error) = store.delete_many(collection, batch_filter(&batch_id)).await {
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                &error.to_string(),
            ));
        }
    }
    Ok(json_reply(
        StatusCode::OK,
        &json!({ "batch_id": batch_id, "deleted": true }),
    ))
}

/// GET /api/health
pub async fn health(store: SharedStore) -> Result<Response, Infallible> {
    if store.ping().await {
        Ok(json_reply(
            StatusCode::OK,
            &json!({ "status": "healthy", "mongodb": "connected" }),
        ))
    } else {
        Ok(json_reply(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({ "status": "unhealthy", "mongodb": "disconnected" }),
        ))
    }
}
