//! Task endpoints the workflow orchestrator calls, one per step.
//!
//! Each takes the current state record as JSON and answers with the updated
//! record. Failures carry the step name and error kind so the orchestrator
//! can decide between retrying and giving up.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::{
    errors::AppError,
    models::state::{StateRecord, Step},
    services::fixity::StepFailure,
    state::AppState,
};

/// `POST /steps/check-restore-status`
pub async fn check_restore_status(
    State(state): State<AppState>,
    Json(record): Json<StateRecord>,
) -> Result<Json<StateRecord>, AppError> {
    state
        .fixity
        .check_restore_status(record)
        .await
        .map(Json)
        .map_err(|err| AppError::from_step(Step::CheckRestoreStatus, err))
}

/// `POST /steps/compute-checksum`
pub async fn compute_checksum(
    State(state): State<AppState>,
    Json(record): Json<StateRecord>,
) -> Result<Json<StateRecord>, AppError> {
    state
        .fixity
        .compute_checksum(record)
        .await
        .map(Json)
        .map_err(|err| AppError::from_step(Step::ComputeChecksum, err))
}

/// `POST /steps/final-validation`
pub async fn final_validation(
    State(state): State<AppState>,
    Json(record): Json<StateRecord>,
) -> Result<Json<StateRecord>, AppError> {
    state
        .fixity
        .final_validation(record)
        .await
        .map(Json)
        .map_err(|err| AppError::from_step(Step::FinalValidation, err))
}

/// `POST /steps/on-error`
pub async fn on_checksum_error(
    State(state): State<AppState>,
    Json(failure): Json<StepFailure>,
) -> Json<Value> {
    let sent = state.fixity.on_checksum_error(failure).await;
    Json(json!({ "sent": sent }))
}
