//! Signed-in user sessions.
//!
//! One registry per process, shared through the application state. A session
//! caches the caller's profile between sign-in and sign-out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{Identity, UserProfile};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub profile: UserProfile,
    pub signed_in_at: DateTime<Utc>,
}

pub struct SessionContext {
    repo: Arc<Repository>,
    admin_emails: Vec<String>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionContext {
    pub fn new(repo: Arc<Repository>, admin_emails: Vec<String>) -> Self {
        Self {
            repo,
            admin_emails,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Ensure the caller has a profile and record a session for them.
    pub async fn sign_in(&self, identity: &Identity) -> Result<Session, AppError> {
        let profile = self.load_or_create(identity).await?;
        let session = Session {
            profile,
            signed_in_at: Utc::now(),
        };

        self.sessions
            .write()
            .await
            .insert(identity.uid.clone(), session.clone());
        tracing::info!(uid = %identity.uid, "Signed in");

        Ok(session)
    }

    /// Drop the caller's session. Returns whether one existed.
    pub async fn sign_out(&self, uid: &str) -> bool {
        let existed = self.sessions.write().await.remove(uid).is_some();
        if existed {
            tracing::info!(uid = %uid, "Signed out");
        }
        existed
    }

    /// The caller's profile: cached when signed in, otherwise loaded (and created on first use).
    pub async fn current(&self, identity: &Identity) -> Result<UserProfile, AppError> {
        if let Some(session) = self.sessions.read().await.get(&identity.uid) {
            return Ok(session.profile.clone());
        }
        self.load_or_create(identity).await
    }

    pub async fn session(&self, uid: &str) -> Option<Session> {
        self.sessions.read().await.get(uid).cloned()
    }

    /// Replace the cached profile after it changed in the store.
    pub async fn refresh(&self, profile: &UserProfile) {
        if let Some(session) = self.sessions.write().await.get_mut(&profile.id) {
            session.profile = profile.clone();
        }
    }

    async fn load_or_create(&self, identity: &Identity) -> Result<UserProfile, AppError> {
        if let Some(profile) = self.repo.get_profile(&identity.uid).await? {
            return Ok(profile);
        }

        let profile = UserProfile::first_sign_in(identity, &self.admin_emails, Utc::now());
        if self.repo.insert_profile_if_absent(&profile).await? {
            tracing::info!(uid = %identity.uid, role = profile.role.as_str(), "Created profile");
            return Ok(profile);
        }

        // Lost a creation race; the stored profile wins
        self.repo
            .get_profile(&identity.uid)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Profile {} vanished", identity.uid)))
    }
}
