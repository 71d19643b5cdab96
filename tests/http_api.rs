mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::{BUCKET, local_store};
use fixity_checker::{config::FixityConfig, routes::routes::routes, state::AppState};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn steps_run_over_http() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    let app = routes().with_state(AppState::new(store, FixityConfig::default()));

    let (status, _, _) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/objects/second-bucket")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, _) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("/objects/{BUCKET}/docs/a.txt"))
            .header("x-amz-meta-md5", "900150983cd24fb0d6963f7d28e17f72")
            .body(Body::from("abc"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::ETAG],
        "\"900150983cd24fb0d6963f7d28e17f72\""
    );

    let (status, headers, _) = send(
        &app,
        Request::builder()
            .method("HEAD")
            .uri(format!("/objects/{BUCKET}/docs/a.txt"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-amz-storage-class"], "STANDARD");
    assert_eq!(
        headers["x-amz-meta-md5"],
        "900150983cd24fb0d6963f7d28e17f72"
    );

    let record = json!({ "bucket": BUCKET, "key": "docs/a.txt" });
    let (status, record) = post_json(&app, "/steps/check-restore-status", &record).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["restoreStatus"], "COMPLETED");
    assert_eq!(record["fileSize"], 3);

    let (status, record) = post_json(&app, "/steps/compute-checksum", &record).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["computed"], "900150983cd24fb0d6963f7d28e17f72");
    assert_eq!(record["status"], "COMPLETED");

    let (status, body) = post_json(&app, "/steps/compute-checksum", &record).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorType"], "AlreadyComputed");
    assert_eq!(body["code"], 1003);
    assert_eq!(body["step"], "ComputeChecksum");
    assert_eq!(body["retryable"], false);

    let (status, record) = post_json(&app, "/steps/final-validation", &record).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["comparedWith"], "object-metadata");
    assert_eq!(record["comparedResult"], "MATCHED");
    assert_eq!(record["tagUpdated"], true);
}

#[tokio::test]
async fn step_errors_name_their_kind() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    let app = routes().with_state(AppState::new(store, FixityConfig::default()));

    let (status, body) = post_json(
        &app,
        "/steps/compute-checksum",
        &json!({ "bucket": BUCKET, "key": "missing" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorType"], "StorageError");

    let (status, body) = post_json(
        &app,
        "/steps/check-restore-status",
        &json!({ "bucket": "Bad_Bucket", "key": "a" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorType"], "InvalidArgument");
    assert_eq!(body["code"], 1002);

    let (status, body) = post_json(
        &app,
        "/steps/on-error",
        &json!({ "error": "States.TaskFailed", "cause": "{\"errorMessage\":\"boom\"}" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], false);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (_dir, store) = local_store(Duration::ZERO).await;
    let app = routes().with_state(AppState::new(store, FixityConfig::default()));

    for uri in ["/healthz", "/readyz"] {
        let (status, _, body) = send(
            &app,
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
    }
}
