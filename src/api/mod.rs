//! REST API module.
//!
//! Contains all API routes and handlers following the frontend contract.

mod admin;
mod attendance;
mod events;
mod images;
mod profile;
mod revision;
mod tasks;

pub use admin::*;
pub use attendance::*;
pub use events::*;
pub use images::*;
pub use profile::*;
pub use revision::*;
pub use tasks::*;

use std::collections::HashMap;

use axum::{
    extract::Multipart,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::images::UploadFile;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Tag an error with the revision the request observed, for use with `map_err`.
pub fn at_revision(revision_id: i64) -> impl Fn(AppError) -> AppErrorWithRevision {
    move |error| AppErrorWithRevision { error, revision_id }
}

/// Text fields and files of a multipart body.
///
/// A file part with no bytes counts as absent.
#[derive(Debug, Default)]
pub struct FormData {
    text: HashMap<String, String>,
    files: HashMap<String, UploadFile>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = FormData::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    if !bytes.is_empty() {
                        form.files.insert(
                            name,
                            UploadFile {
                                file_name,
                                content_type,
                                bytes: bytes.to_vec(),
                            },
                        );
                    }
                }
                None => {
                    form.text.insert(name, field.text().await?);
                }
            }
        }

        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.text.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadFile> {
        self.files.remove(name)
    }
}
