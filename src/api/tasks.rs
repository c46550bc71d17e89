//! Task API endpoints.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use chrono::Utc;

use super::{at_revision, error, success, ApiResult, FormData};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{CreateTaskRequest, ImageRef, Task, TaskListQuery, TaskStats};
use crate::AppState;

/// GET /api/tasks - List tasks, newest first, optionally by status.
pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Vec<Task>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_tasks(query.status).await {
        Ok(tasks) => success(tasks, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/tasks/:id - Get a single task.
pub async fn get_task(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_task(&id).await {
        Ok(Some(task)) => success(task, revision_id),
        Ok(None) => error(task_not_found(&id), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/tasks/stats - Dashboard counters for the caller.
pub async fn task_stats(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<TaskStats> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.task_stats(&identity.uid).await {
        Ok(stats) => success(stats, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tasks - Create a new task.
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Task> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    // Validate required fields
    if request.title.trim().is_empty() {
        return error(
            AppError::Validation("Title is required".to_string()),
            revision_id,
        );
    }
    if request.description.trim().is_empty() {
        return error(
            AppError::Validation("Description is required".to_string()),
            revision_id,
        );
    }

    let task = Task::new(
        request.title.trim().to_string(),
        request.description.trim().to_string(),
        request.priority,
        identity.uid,
        Utc::now(),
    );

    match state.repo.insert_task(&task).await {
        Ok(()) => {
            tracing::info!(task_id = %task.id, "Created task");
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(task, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tasks/:id/claim - Take an available task.
pub async fn claim_task(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let on_error = at_revision(revision_id);

    let profile = state.sessions.current(&identity).await.map_err(&on_error)?;
    let mut task = load_task(&state, &id).await.map_err(&on_error)?;

    task.claim(&identity.uid, profile.snapshot())
        .map_err(&on_error)?;
    state.repo.save_task_state(&task).await.map_err(&on_error)?;

    tracing::info!(task_id = %task.id, uid = %identity.uid, "Claimed task");
    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(task, new_revision)
}

/// POST /api/tasks/:id/release - Hand an in-progress task back.
///
/// Any signed-in user may release any in-progress task.
pub async fn release_task(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let on_error = at_revision(revision_id);

    let mut task = load_task(&state, &id).await.map_err(&on_error)?;
    task.release().map_err(&on_error)?;
    state.repo.save_task_state(&task).await.map_err(&on_error)?;

    tracing::info!(task_id = %task.id, uid = %identity.uid, "Released task");
    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(task, new_revision)
}

/// POST /api/tasks/:id/finish - Complete a task with a proof photo and comment.
///
/// Multipart fields: `comment` (text) and `proof` (file).
pub async fn finish_task(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Task> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let on_error = at_revision(revision_id);

    let mut form = FormData::read(multipart).await.map_err(&on_error)?;

    // Both inputs must be present before anything is uploaded or written
    let comment = form
        .text("comment")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation("Please add a completion comment.".to_string()))
        .map_err(&on_error)?;
    let proof = form
        .take_file("proof")
        .ok_or_else(|| AppError::Validation("Please upload a proof image.".to_string()))
        .map_err(&on_error)?;

    let task = load_task(&state, &id).await.map_err(&on_error)?;
    if task.assignee() != Some(identity.uid.as_str()) {
        return error(
            AppError::Forbidden("Only the assignee can finish this task".to_string()),
            revision_id,
        );
    }

    let url = state.images.upload(proof).await.map_err(&on_error)?;

    let mut task = load_task(&state, &id).await.map_err(&on_error)?;
    task.finish(ImageRef::Hosted { url }, &comment, Utc::now())
        .map_err(&on_error)?;
    state.repo.save_task_state(&task).await.map_err(&on_error)?;

    tracing::info!(task_id = %task.id, uid = %identity.uid, "Finished task");
    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(task, new_revision)
}

async fn load_task(state: &AppState, id: &str) -> Result<Task, AppError> {
    state
        .repo
        .get_task(id)
        .await?
        .ok_or_else(|| task_not_found(id))
}

fn task_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Task {} not found", id))
}
