//! HTTP handlers for loading objects into the local store and inspecting them.
//! Upload bodies are streamed straight to disk.

use crate::{
    errors::AppError,
    models::object::ObjectHead,
    state::AppState,
    storage::{ObjectStorage, local::PutObjectOptions},
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;

const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";
const SSE_HEADER: &str = "x-amz-server-side-encryption";
const RESTORE_HEADER: &str = "x-amz-restore";
const META_PREFIX: &str = "x-amz-meta-";

/// Optional request body for `PUT /objects/{bucket}` (create bucket).
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    #[serde(rename = "LocationConstraint")]
    pub location_constraint: Option<String>,
}

/// Upload an object to `/objects/{bucket}/{*key}`.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let options = PutObjectOptions {
        storage_class: header_str(&headers, STORAGE_CLASS_HEADER),
        server_side_encryption: header_str(&headers, SSE_HEADER),
        metadata: headers
            .iter()
            .filter_map(|(name, value)| {
                let field = name.as_str().strip_prefix(META_PREFIX)?;
                Some((field.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect(),
    };

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .store
        .put_object_stream(&bucket, &key, options, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let resp_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        resp_headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&object.storage_class) {
        resp_headers.insert(HeaderName::from_static(STORAGE_CLASS_HEADER), value);
    }
    Ok(response)
}

/// HEAD `/objects/{bucket}/{*key}`: identity, tier and restore headers, no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let head = state.store.head_object(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &head);
    Ok(response)
}

/// PUT `/objects/{bucket}`: create bucket.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let requested = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CreateBucketReq>(&body)
            .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?
            .location_constraint
    };
    let region = requested.unwrap_or_else(|| "local".into());

    state.store.create_bucket(&bucket, &region).await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CreateBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
            r#"<Location>/{}</Location>"#,
            r#"</CreateBucketResult>"#
        ),
        xml_escape(&bucket)
    );
    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    Ok(response)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set_object_headers(headers: &mut HeaderMap, head: &ObjectHead) {
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&head.content_length.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Ok(value) = HeaderValue::from_str(&head.etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&head.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&head.storage_class) {
        headers.insert(HeaderName::from_static(STORAGE_CLASS_HEADER), value);
    }
    if let Some(value) = head
        .restore
        .as_deref()
        .and_then(|marker| HeaderValue::from_str(marker).ok())
    {
        headers.insert(HeaderName::from_static(RESTORE_HEADER), value);
    }
    if let Some(value) = head
        .server_side_encryption
        .as_deref()
        .and_then(|sse| HeaderValue::from_str(sse).ok())
    {
        headers.insert(HeaderName::from_static(SSE_HEADER), value);
    }
    for (name, value) in &head.metadata {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(format!("{META_PREFIX}{name}").as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
