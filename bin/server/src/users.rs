//! In-memory user directory.
//!
//! Users are identified by their Apple subject and get an internal
//! [`UserId`] on first sign-in. The directory doubles as the strategy's
//! verify callback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::Serialize;
use siwa_auth::{Profile, Verdict, Verify};
use siwa_core::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Internal user ID.
    id: UserId,
    /// Apple subject claim.
    subject: String,
    email: Option<String>,
    /// Only known if captured on the user's first authorization.
    display_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(subject: String) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            subject,
            email: None,
            display_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Applies what the latest sign-in revealed. Absent values never erase
    /// known ones, since Apple sends the name only once.
    fn update_from(&mut self, profile: &Profile) {
        if let Some(email) = &profile.email {
            self.email = Some(email.clone());
        }
        if let Some(name) = display_name(profile) {
            self.display_name = Some(name);
        }
        self.updated_at = Utc::now();
    }
}

fn display_name(profile: &Profile) -> Option<String> {
    let name = profile.name.as_ref()?;
    let parts: Vec<&str> = [name.first_name.as_deref(), name.last_name.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// Find-or-create store of users keyed by Apple subject.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Arc<RwLock<HashMap<String, User>>>,
    reject_unverified_real_users: bool,
}

impl UserDirectory {
    #[must_use]
    pub fn new(reject_unverified_real_users: bool) -> Self {
        Self {
            users: Arc::default(),
            reject_unverified_real_users,
        }
    }

    pub async fn find_by_subject(&self, subject: &str) -> Option<User> {
        self.users.read().await.get(subject).cloned()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl Verify for UserDirectory {
    type User = User;

    async fn verify(
        &self,
        _access_token: &str,
        _refresh_token: Option<&str>,
        profile: Profile,
    ) -> Result<Verdict<User>, Report> {
        // Apple: 0 = unsupported, 1 = unknown, 2 = likely real.
        if self.reject_unverified_real_users && profile.real_user_status == Some(0) {
            info!("rejecting sign-in without real user indicator");
            return Ok(Verdict::reject("real user status could not be verified"));
        }

        let mut users = self.users.write().await;
        let user = match users.get_mut(&profile.id) {
            Some(user) => {
                user.update_from(&profile);
                debug!(user_id = %user.id(), "existing user signed in");
                user.clone()
            }
            None => {
                let mut user = User::new(profile.id.clone());
                user.update_from(&profile);
                info!(user_id = %user.id(), "created user");
                users.insert(profile.id.clone(), user.clone());
                user
            }
        };

        Ok(Verdict::accept(user))
    }
}
