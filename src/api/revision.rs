//! Revision API endpoint.

use axum::extract::State;

use super::{at_revision, success, ApiResult};
use crate::models::RevisionInfo;
use crate::AppState;

/// GET /api/revision - Get the current revision info.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    let revision_info = state.repo.get_revision_info().await.map_err(at_revision(0))?;

    let revision_id = revision_info.revision_id;
    success(revision_info, revision_id)
}
