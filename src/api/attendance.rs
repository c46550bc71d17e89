//! Attendance (leave request) API endpoints.

use axum::extract::{Multipart, Path, State};
use chrono::Utc;

use super::{at_revision, error, success, ApiResult, FormData};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{AttendanceLog, ImageRef, LeaveRequest};
use crate::AppState;

/// GET /api/attendance - List every leave record, newest first.
pub async fn list_attendance(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> ApiResult<Vec<AttendanceLog>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_attendance().await {
        Ok(logs) => success(logs, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/attendance/mine - The caller's leave history.
pub async fn list_my_attendance(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Vec<AttendanceLog>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_attendance_for_user(&identity.uid).await {
        Ok(logs) => success(logs, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/attendance/away - Who is on leave right now, whatever the approval status.
pub async fn list_away(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> ApiResult<Vec<AttendanceLog>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let now = Utc::now();
    match state.repo.list_attendance_ending_from(now).await {
        Ok(logs) => success(logs.into_iter().filter(|log| log.covers(now)).collect(), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/attendance/:id - Get a single leave record.
pub async fn get_attendance(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<AttendanceLog> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_attendance(&id).await {
        Ok(Some(log)) => success(log, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Leave request {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/attendance - Submit a leave request.
///
/// Multipart fields: `type`, `startDate`, `endDate`, `reason` and the `proof` file.
pub async fn submit_leave(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> ApiResult<AttendanceLog> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let on_error = at_revision(revision_id);

    let mut form = FormData::read(multipart).await.map_err(&on_error)?;

    let Some(proof) = form.take_file("proof") else {
        return error(
            AppError::Validation("Please upload a proof image.".to_string()),
            revision_id,
        );
    };

    let request = LeaveRequest::parse(
        form.text("type"),
        form.text("startDate"),
        form.text("endDate"),
        form.text("reason"),
    )
    .map_err(&on_error)?;

    let profile = state.sessions.current(&identity).await.map_err(&on_error)?;
    let url = state.images.upload(proof).await.map_err(&on_error)?;

    let log = AttendanceLog::submit(
        &identity.uid,
        profile.snapshot(),
        request,
        ImageRef::Hosted { url },
        Utc::now(),
    );
    state.repo.insert_attendance(&log).await.map_err(&on_error)?;

    tracing::info!(
        log_id = %log.id,
        uid = %identity.uid,
        leave_type = log.leave_type.as_str(),
        "Submitted leave request"
    );
    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(log, new_revision)
}
