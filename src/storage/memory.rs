use super::{StorageError, StorageResult, UsageSession, UserRecord, UserStore, email_domain};
use crate::utils::request_context::RequestContext;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// In-process user store, used by tests and `database.url = "memory"`
pub struct MemoryStore {
    users: DashMap<String, UserRecord>,
    sessions: DashMap<i64, UsageSession>,
    next_user_id: AtomicI64,
    next_session_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            sessions: DashMap::new(),
            next_user_id: AtomicI64::new(1),
            next_session_id: AtomicI64::new(1),
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn migrate(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn upsert_user(
        &self,
        email: &str,
        name: &str,
        picture_url: Option<&str>,
    ) -> StorageResult<UserRecord> {
        let domain = email_domain(email)?;
        let now = Utc::now();

        let record = self
            .users
            .entry(email.to_string())
            .and_modify(|user| {
                user.name = name.to_string();
                user.picture_url = picture_url.map(str::to_string);
                user.last_access = now;
                user.access_count += 1;
            })
            .or_insert_with(|| UserRecord {
                id: self.next_user_id.fetch_add(1, Ordering::SeqCst),
                email: email.to_string(),
                name: name.to_string(),
                picture_url: picture_url.map(str::to_string),
                domain,
                first_login: now,
                last_access: now,
                access_count: 1,
                is_active: true,
            })
            .clone();

        Ok(record)
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        Ok(self.users.get(email).map(|user| user.clone()))
    }

    async fn open_session(&self, user_id: i64, context: &RequestContext) -> StorageResult<i64> {
        if !self.users.iter().any(|user| user.id == user_id) {
            return Err(StorageError::NotFound);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(
            id,
            UsageSession {
                id,
                user_id,
                session_start: Utc::now(),
                session_end: None,
                ip_address: context.ip_address.clone(),
                user_agent: context.user_agent.clone(),
            },
        );
        Ok(id)
    }

    async fn close_session(&self, session_id: i64) -> StorageResult<()> {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if session.session_end.is_none() {
                session.session_end = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn find_session(&self, session_id: i64) -> StorageResult<Option<UsageSession>> {
        Ok(self.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn count_old_sessions(&self, days: u32) -> StorageResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.session_start < cutoff)
            .count() as u64)
    }

    async fn cleanup_old_sessions(&self, days: u32) -> StorageResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.session_start >= cutoff);
        Ok((before - self.sessions.len()) as u64)
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_inserts_then_counts_accesses() {
        let store = MemoryStore::new();

        let first = store
            .upsert_user("ana@edu.unirio.br", "Ana", None)
            .await
            .unwrap();
        assert_eq!(first.access_count, 1);
        assert_eq!(first.domain, "edu.unirio.br");

        let second = store
            .upsert_user("ana@edu.unirio.br", "Ana Souza", Some("https://pic"))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.access_count, 2);
        assert_eq!(second.name, "Ana Souza");
        assert_eq!(second.picture_url.as_deref(), Some("https://pic"));
        assert_eq!(second.first_login, first.first_login);
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_session_open_close() {
        let store = MemoryStore::new();
        let user = store
            .upsert_user("bia@unirio.br", "Bia", None)
            .await
            .unwrap();

        let context = RequestContext {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
        };
        let id = store.open_session(user.id, &context).await.unwrap();

        let open = store.find_session(id).await.unwrap().unwrap();
        assert!(open.session_end.is_none());
        assert_eq!(open.ip_address.as_deref(), Some("10.0.0.1"));

        store.close_session(id).await.unwrap();
        let closed = store.find_session(id).await.unwrap().unwrap();
        let ended = closed.session_end.unwrap();

        // second close keeps the first timestamp
        store.close_session(id).await.unwrap();
        let again = store.find_session(id).await.unwrap().unwrap();
        assert_eq!(again.session_end, Some(ended));
    }

    #[tokio::test]
    async fn test_open_session_for_unknown_user() {
        let store = MemoryStore::new();
        let result = store.open_session(42, &RequestContext::default()).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_sessions() {
        let store = MemoryStore::new();
        let user = store.upsert_user("c@unirio.br", "C", None).await.unwrap();
        store
            .open_session(user.id, &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(store.count_old_sessions(30).await.unwrap(), 0);
        assert_eq!(store.cleanup_old_sessions(30).await.unwrap(), 0);
        assert_eq!(store.session_count(), 1);
    }
}
