//! HTTP surface: routing, CORS and the JSON error mapping.

mod handlers;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::store::Store;

pub type SharedStore = Arc<dyn Store>;

/// Upper bound on an accepted multipart body.
const MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// The full route tree. Every response, error replies included, carries
/// `Access-Control-Allow-Origin: *`.
pub fn routes(store: SharedStore) -> BoxedFilter<(impl Reply,)> {
    let upload = warp::path!("api" / "upload")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_store(store.clone()))
        .and_then(handlers::upload);

    let status = warp::path!("api" / "status" / String)
        .and(warp::get())
        .and(with_store(store.clone()))
        .and_then(handlers::batch_status);

    let records = warp::path!("api" / "records")
        .and(warp::get())
        .and(warp::query::<handlers::RecordsQuery>())
        .and(with_store(store.clone()))
        .and_then(handlers::records);

    let errors = warp::path!("api" / "errors")
        .and(warp::get())
        .and(warp::query::<handlers::ErrorsQuery>())
        .and(with_store(store.clone()))
        .and_then(handlers::errors);

    let export = warp::path!("api" / "export")
        .and(warp::get())
        .and(warp::query::<handlers::ExportQuery>())
        .and(with_store(store.clone()))
        .and_then(handlers::export);

    let delete = warp::path!("api" / "batches" / String)
        .and(warp::delete())
        .and(with_store(store.clone()))
        .and_then(handlers::delete_batch);

    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_store(store))
        .and_then(handlers::health);

    upload
        .or(status)
        .or(records)
        .or(errors)
        .or(export)
        .or(delete)
        .or(health)
        .recover(handle_rejection)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allow_headers(vec!["Content-Type"]),
        )
        .boxed()
}

/// Binds the server and runs it until ctrl-c.
pub async fn serve(store: SharedStore, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "HTTP surface listening.");
    let (_, server) = warp::serve(routes(store)).bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
    });
    server.await;
}

fn with_store(
    store: SharedStore,
) -> impl Filter<Extract = (SharedStore,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&store))
}

pub(crate) fn json_reply(status: StatusCode, value: &serde_json::Value) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

pub(crate) fn error_reply(status: StatusCode, message: &str) -> warp::reply::Response {
    json_reply(status, &json!({ "error": message }))
}

/// Collapses warp rejections into the service's JSON error shape. Unknown
/// routes and method mismatches both surface as the canonical 404 body.
async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let response = if rejection.is_not_found()
        || rejection
            .find::<warp::reject::MethodNotAllowed>()
            .is_some()
    {
        error_reply(StatusCode::NOT_FOUND, "Not Found")
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        error_reply(StatusCode::BAD_REQUEST, "invalid query string")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "upload too large")
    } else {
        error!(?rejection, "Unhandled rejection.");
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };
    Ok(response)
}
