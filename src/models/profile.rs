//! User profiles, caller identities and the display snapshots copied onto other records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ImageRef;

/// Role of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "user" => Some(UserRole::User),
            _ => None,
        }
    }
}

/// Caller identity as asserted by the upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Display fields of a user frozen onto another record at write time.
///
/// This is a copy, not a reference: renaming a user or changing their avatar
/// leaves existing snapshots untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<ImageRef>,
}

/// A stored user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<ImageRef>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Profile created the first time an identity signs in.
    pub fn first_sign_in(identity: &Identity, admin_emails: &[String], now: DateTime<Utc>) -> Self {
        let email = identity.email.clone().unwrap_or_default();

        let name = identity
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| {
                email
                    .split('@')
                    .next()
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "User".to_string());

        let avatar_url = identity
            .photo_url
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| format!("https://ui-avatars.com/api/?name={}", email));

        let role = if !email.is_empty() && admin_emails.contains(&email.to_lowercase()) {
            UserRole::Admin
        } else {
            UserRole::User
        };

        Self {
            id: identity.uid.clone(),
            name,
            email,
            avatar: Some(ImageRef::Hosted { url: avatar_url }),
            role,
            created_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Copy the display fields for denormalizing onto a task or leave record.
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            display_name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email: Option<&str>, name: Option<&str>, photo: Option<&str>) -> Identity {
        Identity {
            uid: "uid-1".to_string(),
            email: email.map(str::to_string),
            display_name: name.map(str::to_string),
            photo_url: photo.map(str::to_string),
        }
    }

    #[test]
    fn test_first_sign_in_uses_display_name_and_photo() {
        let profile = UserProfile::first_sign_in(
            &identity(Some("ana@example.com"), Some("Ana"), Some("https://p/ana.png")),
            &[],
            Utc::now(),
        );
        assert_eq!(profile.name, "Ana");
        assert_eq!(profile.role, UserRole::User);
        assert_eq!(
            profile.avatar.as_ref().and_then(|a| a.url()),
            Some("https://p/ana.png")
        );
    }

    #[test]
    fn test_first_sign_in_defaults() {
        let profile =
            UserProfile::first_sign_in(&identity(Some("bo@example.com"), None, None), &[], Utc::now());
        assert_eq!(profile.name, "bo");
        assert_eq!(
            profile.avatar.as_ref().and_then(|a| a.url()),
            Some("https://ui-avatars.com/api/?name=bo@example.com")
        );

        let anonymous = UserProfile::first_sign_in(&identity(None, Some("  "), None), &[], Utc::now());
        assert_eq!(anonymous.name, "User");
        assert_eq!(anonymous.email, "");
    }

    #[test]
    fn test_admin_emails_grant_admin_role() {
        let admins = vec!["boss@example.com".to_string()];
        let profile =
            UserProfile::first_sign_in(&identity(Some("Boss@Example.com"), None, None), &admins, Utc::now());
        assert!(profile.is_admin());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut profile =
            UserProfile::first_sign_in(&identity(Some("cy@example.com"), Some("Cy"), None), &[], Utc::now());
        let snapshot = profile.snapshot();
        profile.name = "Cyrus".to_string();
        assert_eq!(snapshot.display_name, "Cy");
    }
}
