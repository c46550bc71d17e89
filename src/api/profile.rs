//! Session and profile API endpoints.

use axum::extract::{Multipart, State};
use serde::Serialize;

use super::{at_revision, error, success, ApiResult, FormData};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{ImageRef, UserProfile};
use crate::session::Session;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutResult {
    pub signed_out: bool,
}

/// POST /api/session - Sign in, creating the profile on first use.
pub async fn sign_in(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Session> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.sessions.sign_in(&identity).await {
        Ok(session) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(session, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/session - The caller's active session.
pub async fn get_session(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Session> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.sessions.session(&identity.uid).await {
        Some(session) => success(session, revision_id),
        None => error(
            AppError::NotFound("No active session".to_string()),
            revision_id,
        ),
    }
}

/// DELETE /api/session - Sign out.
pub async fn sign_out(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<SignOutResult> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let signed_out = state.sessions.sign_out(&identity.uid).await;
    success(SignOutResult { signed_out }, revision_id)
}

/// GET /api/profile - The caller's profile.
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<UserProfile> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.sessions.current(&identity).await {
        Ok(profile) => success(profile, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/profile - Change display name and optionally the avatar.
///
/// Multipart fields: `name` and an optional `avatar` file. Snapshots already
/// copied onto tasks and leave records keep the old values.
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> ApiResult<UserProfile> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let on_error = at_revision(revision_id);

    let mut form = FormData::read(multipart).await.map_err(&on_error)?;

    let name = match form.text("name").map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            return error(
                AppError::Validation("Name is required".to_string()),
                revision_id,
            )
        }
    };

    // Make sure the profile exists before uploading anything for it
    state.sessions.current(&identity).await.map_err(&on_error)?;

    let avatar = match form.take_file("avatar") {
        Some(file) => Some(ImageRef::Hosted {
            url: state.images.upload(file).await.map_err(&on_error)?,
        }),
        None => None,
    };

    let profile = state
        .repo
        .update_profile(&identity.uid, &name, avatar.as_ref())
        .await
        .map_err(&on_error)?;
    state.sessions.refresh(&profile).await;

    tracing::info!(uid = %identity.uid, "Updated profile");
    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(profile, new_revision)
}
