//! End-to-end tests of the HTTP surface over the in-memory store.

use std::sync::Arc;

use serde_json::Value;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::Reply;

use shipstream::http::routes;
use shipstream::store::{MemoryStore, Store, BATCHES, SHIPMENTS};

const BOUNDARY: &str = "----shipstream-test-boundary";

const VALID_CSV: &str = "\
tracking_number,origin,destination,weight_kg,length_cm,width_cm,height_cm,ship_date,status
TRACK00001,Rotterdam,Hamburg,10.0,0,0,0,2024-01-02,pending
TRACK00002,Antwerp,Bremen,5.5,1,2,3,2024-03-15,in_transit
TRACK00003,Gdansk,Oslo,2.25,0,0,0,2024-02-29,delivered
";

fn setup() -> (Arc<MemoryStore>, BoxedFilter<(impl Reply,)>) {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn Store> = memory.clone();
    (memory, routes(store))
}

fn multipart_body(csv: &str) -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"shipments.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {csv}\r\n\
         --{BOUNDARY}--\r\n"
    )
    .into_bytes()
}

async fn upload(filter: &BoxedFilter<(impl Reply + 'static,)>, csv: &str) -> (StatusCode, Value) {
    let response = warp::test::request()
        .method("POST")
        .path("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(csv))
        .reply(filter)
        .await;
    let body: Value = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status(), body)
}

async fn get(filter: &BoxedFilter<(impl Reply + 'static,)>, path: &str) -> (StatusCode, Value) {
    let response = warp::test::request().path(path).reply(filter).await;
    let body: Value = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (response.status(), body)
}

#[tokio::test]
async fn upload_returns_the_batch_id_and_persists_records() {
    let (memory, filter) = setup();

    let (status, body) = upload(&filter, VALID_CSV).await;
    assert_eq!(status, StatusCode::OK);
    let batch_id = body["batch_id"].as_str().unwrap();
    assert_eq!(batch_id.len(), 36);
    assert_eq!(body["message"], "upload complete");

    assert_eq!(memory.documents(SHIPMENTS).len(), 3);
    assert_eq!(memory.documents(BATCHES).len(), 1);
}

#[tokio::test]
async fn status_reports_the_final_counters() {
    let (_memory, filter) = setup();
    let (_, body) = upload(&filter, VALID_CSV).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let (status, progress) = get(&filter, &format!("/api/status/{batch_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["total_rows"], 3);
    assert_eq!(progress["processed_rows"], 3);
    assert_eq!(progress["valid_rows"], 3);
    assert_eq!(progress["invalid_rows"], 0);
    // Integer-encoded lifecycle: 4 == complete.
    assert_eq!(progress["current_status"], 4);
}

#[tokio::test]
async fn status_of_an_unknown_batch_is_404() {
    let (_memory, filter) = setup();
    let (status, body) = get(&filter, "/api/status/no-such-batch").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "batch not found");
}

#[tokio::test]
async fn records_are_paginated_and_sorted_by_row_number() {
    let (_memory, filter) = setup();
    let (_, body) = upload(&filter, VALID_CSV).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let (status, rows) = get(&filter, &format!("/api/records?batch_id={batch_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap().clone();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["row_number"], 1);
    assert_eq!(rows[2]["tracking_number"], "TRACK00003");

    let (_, page) = get(
        &filter,
        &format!("/api/records?batch_id={batch_id}&skip=1&limit=1"),
    )
    .await;
    let page = page.as_array().unwrap().clone();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["row_number"], 2);
}

#[tokio::test]
async fn records_search_is_case_insensitive() {
    let (_memory, filter) = setup();
    let (_, body) = upload(&filter, VALID_CSV).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let (_, rows) = get(
        &filter,
        &format!("/api/records?batch_id={batch_id}&search=ANTWERP"),
    )
    .await;
    let rows = rows.as_array().unwrap().clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["tracking_number"], "TRACK00002");
}

#[tokio::test]
async fn records_without_a_batch_id_is_400() {
    let (_memory, filter) = setup();
    let (status, body) = get(&filter, "/api/records?limit=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing batch_id parameter");
}

#[tokio::test]
async fn validation_errors_are_listed_by_row() {
    let (_memory, filter) = setup();
    let csv = "\
tracking_number,origin,destination,weight_kg,length_cm,width_cm,height_cm,ship_date,status
TRACK00001,Rotterdam,Hamburg,10.0,0,0,0,2024-01-02,SHIPPED
TRACK00002,Antwerp,Bremen,5.5,0,0,0,2023-02-29,pending
";
    let (_, body) = upload(&filter, csv).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let (status, errors) = get(&filter, &format!("/api/errors?batch_id={batch_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let errors = errors.as_array().unwrap().clone();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["row_number"], 1);
    assert_eq!(errors[0]["field"], "status");
    assert_eq!(errors[0]["actual"], "SHIPPED");
    assert_eq!(errors[1]["field"], "ship_date");

    let (_, progress) = get(&filter, &format!("/api/status/{batch_id}")).await;
    assert_eq!(progress["valid_rows"], 0);
    assert_eq!(progress["invalid_rows"], 2);
}

#[tokio::test]
async fn export_streams_a_json_array() {
    let (_memory, filter) = setup();
    let (_, body) = upload(&filter, VALID_CSV).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let response = warp::test::request()
        .path(&format!("/api/export?batch_id={batch_id}&format=json"))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"export.json\""
    );
    let value: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn export_streams_csv_rows() {
    let (_memory, filter) = setup();
    let (_, body) = upload(&filter, VALID_CSV).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let response = warp::test::request()
        .path(&format!("/api/export?batch_id={batch_id}&format=csv"))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/csv");

    let text = String::from_utf8(response.body().to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("TRACK00001,Rotterdam,Hamburg,10,"));
}

#[tokio::test]
async fn delete_cascades_across_all_collections() {
    let (memory, filter) = setup();
    let (_, body) = upload(&filter, VALID_CSV).await;
    let batch_id = body["batch_id"].as_str().unwrap();

    let response = warp::test::request()
        .method("DELETE")
        .path(&format!("/api/batches/{batch_id}"))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(memory.documents(SHIPMENTS).is_empty());
    assert!(memory.documents(BATCHES).is_empty());
    let (status, _) = get(&filter, &format!("/api/status/{batch_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_without_a_file_part_is_400() {
    let (_memory, filter) = setup();
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"other\"\r\n\r\n\
         hello\r\n\
         --{BOUNDARY}--\r\n"
    );
    let response = warp::test::request()
        .method("POST")
        .path("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unparseable_header_is_a_client_error() {
    let (_memory, filter) = setup();
    let oversized_header = "x".repeat(5000);
    let (status, body) = upload(&filter, &oversized_header).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("header"));
}

#[tokio::test]
async fn health_reflects_the_store_ping() {
    let (_memory, filter) = setup();
    let (status, body) = get(&filter, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mongodb"], "connected");
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let (_memory, filter) = setup();
    let (status, body) = get(&filter, "/api/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let (_memory, filter) = setup();
    let response = warp::test::request()
        .path("/api/health")
        .header("origin", "http://localhost:5173")
        .reply(&filter)
        .await;
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}
