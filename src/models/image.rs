//! Image references and the legacy image store document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an image lives.
///
/// Older records point into the `image_store` collection by id; newer ones carry a URL
/// on the image host. Stored rows keep both columns, and [`ImageRef::resolve`] collapses
/// them once when a row is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImageRef {
    Hosted { url: String },
    Legacy { id: String },
}

impl ImageRef {
    /// Pick the hosted URL when present, else the legacy id. Blank values count as absent.
    pub fn resolve(url: Option<String>, legacy_id: Option<String>) -> Option<Self> {
        let url = url.filter(|u| !u.trim().is_empty());
        let legacy_id = legacy_id.filter(|i| !i.trim().is_empty());
        match (url, legacy_id) {
            (Some(url), _) => Some(ImageRef::Hosted { url }),
            (None, Some(id)) => Some(ImageRef::Legacy { id }),
            (None, None) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ImageRef::Hosted { url } => Some(url),
            ImageRef::Legacy { .. } => None,
        }
    }

    pub fn legacy_id(&self) -> Option<&str> {
        match self {
            ImageRef::Legacy { id } => Some(id),
            ImageRef::Hosted { .. } => None,
        }
    }
}

/// Split an optional reference back into its `(url, legacy id)` storage columns.
pub fn image_columns(image: Option<&ImageRef>) -> (Option<&str>, Option<&str>) {
    match image {
        Some(image) => (image.url(), image.legacy_id()),
        None => (None, None),
    }
}

/// What a legacy image document proves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageRefType {
    Profile,
    TaskProof,
    AttendanceProof,
}

impl ImageRefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageRefType::Profile => "profile",
            ImageRefType::TaskProof => "task_proof",
            ImageRefType::AttendanceProof => "attendance_proof",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(ImageRefType::Profile),
            "task_proof" => Some(ImageRefType::TaskProof),
            "attendance_proof" => Some(ImageRefType::AttendanceProof),
            _ => None,
        }
    }
}

/// A document in the legacy `image_store` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDocument {
    pub id: String,
    /// Data URL with the encoded image
    pub content: String,
    pub ref_type: ImageRefType,
    /// Task or user the image belongs to
    pub related_id: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_url() {
        let resolved = ImageRef::resolve(
            Some("https://img.example/a.png".to_string()),
            Some("legacy-1".to_string()),
        );
        assert_eq!(
            resolved,
            Some(ImageRef::Hosted {
                url: "https://img.example/a.png".to_string()
            })
        );
    }

    #[test]
    fn test_resolve_falls_back_to_legacy_id() {
        let resolved = ImageRef::resolve(Some("  ".to_string()), Some("legacy-1".to_string()));
        assert_eq!(
            resolved,
            Some(ImageRef::Legacy {
                id: "legacy-1".to_string()
            })
        );
        assert_eq!(ImageRef::resolve(None, None), None);
    }

    #[test]
    fn test_image_ref_serializes_tagged() {
        let json = serde_json::to_value(ImageRef::Legacy {
            id: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "legacy");
        assert_eq!(json["id"], "abc");
    }

    #[test]
    fn test_image_columns_round_trip() {
        let hosted = ImageRef::Hosted {
            url: "https://img.example/b.png".to_string(),
        };
        assert_eq!(
            image_columns(Some(&hosted)),
            (Some("https://img.example/b.png"), None)
        );
        assert_eq!(image_columns(None), (None, None));
    }
}
