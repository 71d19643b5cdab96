//! Route table.
//!
//! - **Step endpoints** (called by the workflow orchestrator)
//!   - `POST /steps/check-restore-status`
//!   - `POST /steps/compute-checksum`
//!   - `POST /steps/final-validation`
//!   - `POST /steps/on-error`
//!
//! - **Object endpoints** (load and inspect the local store)
//!   - `PUT  /objects/{bucket}`: create bucket
//!   - `PUT  /objects/{bucket}/{*key}`: upload object
//!   - `HEAD /objects/{bucket}/{*key}`: identity, tier and restore headers
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{create_bucket, head_object, upload_object},
        step_handlers::{check_restore_status, compute_checksum, final_validation, on_checksum_error},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/steps/check-restore-status", post(check_restore_status))
        .route("/steps/compute-checksum", post(compute_checksum))
        .route("/steps/final-validation", post(final_validation))
        .route("/steps/on-error", post(on_checksum_error))
        .route(
            "/objects/{bucket}/{*key}",
            put(upload_object).head(head_object),
        )
        .route("/objects/{bucket}", put(create_bucket))
}
