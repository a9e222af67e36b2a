use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::{
    health::{HealthCheckResult, HealthChecker},
    utils::request_context::RequestContext,
};

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A student or staff member who has signed in at least once
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub picture_url: Option<String>,
    pub domain: String,
    pub first_login: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub access_count: i64,
    pub is_active: bool,
}

/// One signed-in stretch of a user, from login to logout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageSession {
    pub id: i64,
    pub user_id: i64,
    pub session_start: DateTime<Utc>,
    pub session_end: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Persistence collaborator for the login flow.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create missing tables
    async fn migrate(&self) -> StorageResult<()>;

    /// Insert the user on first login, otherwise bump `access_count` and
    /// refresh `last_access`, name and picture.
    async fn upsert_user(
        &self,
        email: &str,
        name: &str,
        picture_url: Option<&str>,
    ) -> StorageResult<UserRecord>;

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>>;

    /// Open a usage session and return its id
    async fn open_session(&self, user_id: i64, context: &RequestContext) -> StorageResult<i64>;

    /// Stamp `session_end`; closing an already closed session is a no-op
    async fn close_session(&self, session_id: i64) -> StorageResult<()>;

    async fn find_session(&self, session_id: i64) -> StorageResult<Option<UsageSession>>;

    /// Number of sessions started more than `days` days ago
    async fn count_old_sessions(&self, days: u32) -> StorageResult<u64>;

    /// Delete sessions started more than `days` days ago
    async fn cleanup_old_sessions(&self, days: u32) -> StorageResult<u64>;

    async fn health_check(&self) -> StorageResult<()>;
}

/// Domain part of an email address, lower-cased.
pub fn email_domain(email: &str) -> StorageResult<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .filter(|domain| !domain.is_empty())
        .ok_or_else(|| StorageError::InvalidData(format!("email without domain: {email}")))
}

/// Open the store named by `database.url`.
///
/// `memory` (or `memory://`) selects the in-process store, anything else is
/// handed to SQLite.
pub async fn create_store(database_url: &str) -> StorageResult<Arc<dyn UserStore>> {
    if database_url == "memory" || database_url.starts_with("memory://") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::new(database_url).await?))
}

/// Health adapter registered with the health service
pub struct StoreHealthChecker {
    store: Arc<dyn UserStore>,
}

impl StoreHealthChecker {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthChecker for StoreHealthChecker {
    fn name(&self) -> &str {
        "storage"
    }

    async fn check(&self) -> HealthCheckResult {
        match self.store.health_check().await {
            Ok(()) => HealthCheckResult::healthy(),
            Err(e) => HealthCheckResult::unhealthy(format!("Storage unavailable: {e}")),
        }
    }
}
