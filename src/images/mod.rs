//! Image hosting.
//!
//! Proof photos and avatars are pushed to a hosted image service; records only
//! keep the returned URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::ImageHostConfig;
use crate::errors::AppError;

const UPLOAD_FAILED: &str = "Failed to upload image. Please try again.";

/// A file received from the client, ready to be uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Destination for uploaded images.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Store the image and return its public URL.
    async fn upload(&self, file: UploadFile) -> Result<String, AppError>;
}

/// Cloudinary unsigned uploads.
pub struct CloudinaryHost {
    config: ImageHostConfig,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

impl CloudinaryHost {
    pub fn new(config: ImageHostConfig) -> Self {
        Self::with_base_url(config, "https://api.cloudinary.com")
    }

    pub fn with_base_url(config: ImageHostConfig, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn endpoint(&self) -> Result<(String, String), AppError> {
        match (&self.config.cloud_name, &self.config.upload_preset) {
            (Some(cloud), Some(preset)) => Ok((
                format!("{}/v1_1/{}/image/upload", self.base_url, cloud),
                preset.clone(),
            )),
            _ => Err(AppError::Config(
                "Image hosting is not configured (cloud name and upload preset required)"
                    .to_string(),
            )),
        }
    }
}

#[async_trait]
impl ImageHost for CloudinaryHost {
    async fn upload(&self, file: UploadFile) -> Result<String, AppError> {
        let (url, preset) = self.endpoint()?;

        let mut part = Part::bytes(file.bytes).file_name(file.file_name);
        if let Some(content_type) = file.content_type.as_deref() {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", preset);

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Image host rejected upload");
            return Err(AppError::Upload(UPLOAD_FAILED.to_string()));
        }

        let uploaded: UploadResponse = response.json().await?;
        tracing::debug!(url = %uploaded.secure_url, "Uploaded image");
        Ok(uploaded.secure_url)
    }
}
