use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::{ApiJson, ApiPath};
use crate::api::middleware::AppState;
use crate::error::AppError;
use crate::models::{
    AttendanceRecord, AttendanceReportRow, AttendanceState, AttendanceSummary, AttendeeInput,
    Token, TransitionType,
};
use crate::services::{report, ProcessOutcome};

#[derive(Debug, Deserialize)]
pub struct ProcessAttendanceRequest {
    pub token_id: Uuid,
    #[serde(flatten)]
    pub attendee: AttendeeInput,
}

#[derive(Debug, Serialize)]
pub struct ProcessAttendanceResponse {
    pub token: Token,
    pub attendance_record: Option<AttendanceRecord>,
    pub transition_type: Option<TransitionType>,
    pub applied: bool,
    pub state: AttendanceState,
    pub message: String,
}

impl From<ProcessOutcome> for ProcessAttendanceResponse {
    fn from(outcome: ProcessOutcome) -> Self {
        let state = outcome.state();
        let (attendance_record, transition_type, applied) = match outcome.transition {
            Some(t) => (Some(t.record), Some(t.kind), t.applied),
            None => (None, None, false),
        };

        let message = match (transition_type, applied) {
            (None, _) => "Token is not registered yet",
            (Some(TransitionType::Registered), true) => "Registration successful",
            (Some(TransitionType::Registered), false) => {
                "Token is already registered, scan again to time in"
            }
            (Some(TransitionType::TimeIn), true) => "Time in recorded",
            (Some(TransitionType::TimeIn), false) => "Time in was already recorded",
            (Some(TransitionType::TimeOut), true) => "Time out recorded",
            (Some(TransitionType::TimeOut), false) => "Time out was already recorded",
            (Some(TransitionType::Completed), _) => "Attendance already completed",
        };

        Self {
            token: outcome.token,
            attendance_record,
            transition_type,
            applied,
            state,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

/// Registers a token or advances its attendance, depending on its state.
///
/// Any attendee field in the body makes the call a registration attempt;
/// a bare `token_id` is a scan.
async fn process_attendance(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ProcessAttendanceRequest>,
) -> Result<(StatusCode, Json<ProcessAttendanceResponse>), AppError> {
    let attendee = if req.attendee.is_empty() {
        None
    } else {
        Some(req.attendee)
    };

    let outcome = state.engine.process(req.token_id, attendee).await?;
    let response = ProcessAttendanceResponse::from(outcome);

    let status = match (response.transition_type, response.applied) {
        (Some(TransitionType::Registered), true) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };

    Ok((status, Json(response)))
}

async fn list_attendance(
    State(state): State<AppState>,
) -> Result<Json<Vec<AttendanceReportRow>>, AppError> {
    Ok(Json(state.store.snapshot().await?))
}

async fn attendance_summary(
    State(state): State<AppState>,
) -> Result<Json<AttendanceSummary>, AppError> {
    Ok(Json(state.store.summary().await?))
}

/// Downloads all attendance records as CSV
async fn export_attendance(State(state): State<AppState>) -> Result<Response, AppError> {
    let offset = state.config.report_offset();
    let rows = state.store.snapshot().await?;
    let csv = report::render_csv(&rows, offset);

    let filename = format!(
        "attendance-{}.csv",
        Utc::now().with_timezone(&offset).format("%Y%m%d")
    );

    tracing::info!(rows = rows.len(), "Attendance exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response())
}

/// Edits the attendee identity of a record; timestamps are left alone
async fn update_attendance(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(input): ApiJson<AttendeeInput>,
) -> Result<Json<AttendanceRecord>, AppError> {
    let details = input.validate().map_err(AppError::Validation)?;

    let record = state
        .store
        .update_record_details(id, &details)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attendance record {} not found", id)))?;

    tracing::info!(record_id = %id, "Attendance record updated");

    Ok(Json(record))
}

async fn delete_attendance(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    let record = state
        .store
        .delete_record(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attendance record {} not found", id)))?;

    tracing::info!(record_id = %id, token_id = %record.token_id, "Attendance record deleted");

    Ok(Json(DeletedResponse { deleted: true }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/attendance", post(process_attendance))
        .route("/api/attendance/summary", get(attendance_summary))
}

/// Routes that must sit behind the admin password; these expose attendee
/// contact details
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/api/attendance", get(list_attendance))
        .route("/api/attendance/export", get(export_attendance))
        .route(
            "/api/attendance/:id",
            put(update_attendance).delete(delete_attendance),
        )
}
