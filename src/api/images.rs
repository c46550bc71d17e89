//! Legacy image store read endpoint.

use axum::extract::{Path, State};

use super::{error, success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::ImageDocument;
use crate::AppState;

/// GET /api/images/:id - Fetch a legacy image document.
pub async fn get_image(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<ImageDocument> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_image(&id).await {
        Ok(Some(image)) => success(image, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Image {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}
