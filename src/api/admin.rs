//! Operator endpoints for data maintenance. Admin role required.

use axum::{extract::State, Json};
use chrono::Utc;

use super::{at_revision, error, success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::{delete_range, CleanupRequest, DateRange, RangeDeleteReport, SweepReport};
use crate::models::Identity;
use crate::AppState;

async fn require_admin(state: &AppState, identity: &Identity) -> Result<(), AppError> {
    let profile = state.sessions.current(identity).await?;
    if profile.is_admin() {
        Ok(())
    } else {
        tracing::warn!(uid = %identity.uid, "Rejected maintenance call from non-admin");
        Err(AppError::Forbidden("Admin role required".to_string()))
    }
}

/// POST /api/admin/cleanup - Delete records created within a date range.
pub async fn cleanup_range(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<RangeDeleteReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let on_error = at_revision(revision_id);

    require_admin(&state, &identity).await.map_err(&on_error)?;
    let range = DateRange::parse(&request).map_err(&on_error)?;

    match delete_range(&state.repo, &range).await {
        Ok(report) => {
            tracing::info!(uid = %identity.uid, total = report.total, "Range cleanup requested");
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(report, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/retention-sweep - Run the retention sweep now.
pub async fn run_retention_sweep(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<SweepReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    require_admin(&state, &identity)
        .await
        .map_err(at_revision(revision_id))?;

    match state.sweeper.sweep(Utc::now()).await {
        Ok(report) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(report, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
