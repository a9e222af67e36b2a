use super::{AuthError, UserProfile};
use crate::{config::AdminConfig, storage::UserStore, utils::request_context::RequestContext};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

/// A signed-in browser session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub email: String,
    pub display_name: String,
    pub picture_url: Option<String>,
    pub authenticated: bool,
    pub user_id: i64,
    pub usage_session_id: i64,
    pub is_admin: bool,
    pub authenticated_at: DateTime<Utc>,
}

/// Records a successful login with the user store
pub struct SessionBinder {
    store: Arc<dyn UserStore>,
    admins: AdminConfig,
}

impl SessionBinder {
    pub fn new(store: Arc<dyn UserStore>, admins: AdminConfig) -> Self {
        Self { store, admins }
    }

    /// Upsert the user, open a usage session and build the session value.
    /// Call only after the domain gate has accepted `profile.email`.
    pub async fn bind(
        &self,
        profile: &UserProfile,
        context: &RequestContext,
    ) -> Result<AuthenticatedSession, AuthError> {
        let user = self
            .store
            .upsert_user(&profile.email, &profile.name, profile.picture.as_deref())
            .await?;
        let usage_session_id = self.store.open_session(user.id, context).await?;

        info!(
            user_id = user.id,
            email = %user.email,
            access_count = user.access_count,
            usage_session_id,
            "User signed in"
        );

        Ok(AuthenticatedSession {
            is_admin: self.admins.is_admin(&user.email),
            email: user.email,
            display_name: user.name,
            picture_url: user.picture_url,
            authenticated: true,
            user_id: user.id,
            usage_session_id,
            authenticated_at: Utc::now(),
        })
    }

    /// Close the usage session. The session value is consumed.
    pub async fn unbind(&self, session: AuthenticatedSession) -> Result<(), AuthError> {
        self.store.close_session(session.usage_session_id).await?;
        info!(
            user_id = session.user_id,
            usage_session_id = session.usage_session_id,
            "User signed out"
        );
        Ok(())
    }
}

struct RegistryEntry {
    session: AuthenticatedSession,
    last_seen: Instant,
}

/// Live browser sessions keyed by the opaque id in the session cookie.
///
/// Entries idle for longer than the TTL are treated as gone.
pub struct SessionRegistry {
    entries: DashMap<String, RegistryEntry>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a session and return its new id
    pub fn insert(&self, session: AuthenticatedSession) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.entries.insert(
            id.clone(),
            RegistryEntry {
                session,
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Look up a live session and refresh its idle timer.
    ///
    /// Idle entries read as absent but stay in the map until
    /// `purge_expired` collects them, so their usage session still gets
    /// closed.
    pub fn get(&self, id: &str) -> Option<AuthenticatedSession> {
        let mut entry = self.entries.get_mut(id)?;
        if entry.last_seen.elapsed() > self.ttl {
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.session.clone())
    }

    pub fn remove(&self, id: &str) -> Option<AuthenticatedSession> {
        self.entries.remove(id).map(|(_, entry)| entry.session)
    }

    /// Drop idle sessions and hand them back so their usage sessions can
    /// be closed
    pub fn purge_expired(&self) -> Vec<AuthenticatedSession> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.last_seen.elapsed() > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    /// Remove every session, live or idle
    pub fn drain(&self) -> Vec<AuthenticatedSession> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Close the usage sessions of every idle registry entry
pub async fn sweep_idle_sessions(registry: &SessionRegistry, binder: &SessionBinder) -> usize {
    let expired = registry.purge_expired();
    let count = expired.len();
    for session in expired {
        let usage_session_id = session.usage_session_id;
        if let Err(e) = binder.unbind(session).await {
            warn!(usage_session_id, error = %e, "Failed to close idle session");
        }
    }
    count
}

pub fn build_set_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut out = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        out.push_str("; Secure");
    }
    out
}

pub fn build_clear_cookie(name: &str, secure: bool) -> String {
    build_set_cookie(name, "", 0, secure)
}

/// Value of cookie `name` from a `Cookie` request header
pub fn cookie_value(cookie_header: Option<&str>, name: &str) -> Option<String> {
    cookie_header.and_then(|header| {
        header.split(';').find_map(|part| {
            let (key, value) = part.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
    })
}
