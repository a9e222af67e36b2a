use super::{
    StorageError, StorageResult, UsageSession, UserRecord, UserStore, email_domain, migrations,
};
use crate::utils::request_context::RequestContext;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{
    Pool, Row, Sqlite,
    migrate::MigrateDatabase,
    sqlite::{SqlitePoolOptions, SqliteRow},
};

const USER_COLUMNS: &str = "id, email, name, profile_picture_url, domain, first_login, last_access, access_count, is_active";
const SESSION_COLUMNS: &str = "id, user_id, session_start, session_end, ip_address, user_agent";

/// SQLite user store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> StorageResult<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory && !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            Sqlite::create_database(database_url)
                .await
                .map_err(|e| StorageError::Connection(format!("Failed to create database: {}", e)))?;
        }

        // every connection to `:memory:` would see its own empty database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        picture_url: row.try_get("profile_picture_url")?,
        domain: row.try_get("domain")?,
        first_login: row.try_get("first_login")?,
        last_access: row.try_get("last_access")?,
        access_count: row.try_get("access_count")?,
        is_active: row.try_get("is_active")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<UsageSession, sqlx::Error> {
    Ok(UsageSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        session_start: row.try_get("session_start")?,
        session_end: row.try_get("session_end")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
    })
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn migrate(&self) -> StorageResult<()> {
        migrations::run_sqlite_migrations(&self.pool).await?;
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

        let sql = format!(
            r#"
            INSERT INTO users (email, name, profile_picture_url, domain, first_login, last_access, access_count, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1, TRUE, ?5, ?5)
            ON CONFLICT (email)
            DO UPDATE SET
                name = excluded.name,
                profile_picture_url = excluded.profile_picture_url,
                last_access = excluded.last_access,
                access_count = users.access_count + 1,
                updated_at = excluded.updated_at
            RETURNING {USER_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(email)
            .bind(name)
            .bind(picture_url)
            .bind(&domain)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to upsert user: {}", e)))?;

        user_from_row(&row)
            .map_err(|e| StorageError::InvalidData(format!("Bad user row: {}", e)))
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to get user by email: {}", e)))?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| StorageError::InvalidData(format!("Bad user row: {}", e)))
    }

    async fn open_session(&self, user_id: i64, context: &RequestContext) -> StorageResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO user_sessions (user_id, session_start, ip_address, user_agent)
            SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM users WHERE id = ?1)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(&context.ip_address)
        .bind(&context.user_agent)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("Failed to open session: {}", e)))?
        .ok_or(StorageError::NotFound)?;

        row.try_get::<i64, _>("id")
            .map_err(|e| StorageError::InvalidData(format!("Bad session row: {}", e)))
    }

    async fn close_session(&self, session_id: i64) -> StorageResult<()> {
        sqlx::query(
            "UPDATE user_sessions SET session_end = ?1 WHERE id = ?2 AND session_end IS NULL",
        )
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("Failed to close session: {}", e)))?;

        Ok(())
    }

    async fn find_session(&self, session_id: i64) -> StorageResult<Option<UsageSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to get session: {}", e)))?;

        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(|e| StorageError::InvalidData(format!("Bad session row: {}", e)))
    }

    async fn count_old_sessions(&self, days: u32) -> StorageResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let row = sqlx::query("SELECT COUNT(*) AS total FROM user_sessions WHERE session_start < ?1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to count sessions: {}", e)))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StorageError::InvalidData(format!("Bad count row: {}", e)))?;
        Ok(total as u64)
    }

    async fn cleanup_old_sessions(&self, days: u32) -> StorageResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let result = sqlx::query("DELETE FROM user_sessions WHERE session_start < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to cleanup sessions: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_store() -> SqliteStore {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_upsert_user_insert_and_update() {
        let store = create_test_store().await;

        let created = store
            .upsert_user("joao@uniriotec.br", "João", Some("https://pic/1"))
            .await
            .unwrap();
        assert_eq!(created.access_count, 1);
        assert_eq!(created.domain, "uniriotec.br");
        assert!(created.is_active);

        let updated = store
            .upsert_user("joao@uniriotec.br", "João Silva", None)
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.access_count, 2);
        assert_eq!(updated.name, "João Silva");
        assert_eq!(updated.picture_url, None);
        assert_eq!(updated.first_login, created.first_login);
        assert!(updated.last_access >= created.last_access);

        let found = store
            .find_user_by_email("joao@uniriotec.br")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, updated);
    }

    #[tokio::test]
    async fn test_find_missing_user() {
        let store = create_test_store().await;
        assert!(
            store
                .find_user_by_email("nobody@unirio.br")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = create_test_store().await;
        let user = store
            .upsert_user("maria@edu.unirio.br", "Maria", None)
            .await
            .unwrap();

        let context = RequestContext {
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: Some("Mozilla/5.0 Test".to_string()),
        };
        let session_id = store.open_session(user.id, &context).await.unwrap();

        let session = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.ip_address.as_deref(), Some("203.0.113.9"));
        assert!(session.session_end.is_none());

        store.close_session(session_id).await.unwrap();
        let closed = store.find_session(session_id).await.unwrap().unwrap();
        assert!(closed.session_end.is_some());

        // closing twice keeps the first end stamp
        store.close_session(session_id).await.unwrap();
        let again = store.find_session(session_id).await.unwrap().unwrap();
        assert_eq!(again.session_end, closed.session_end);
    }

    #[tokio::test]
    async fn test_open_session_unknown_user() {
        let store = create_test_store().await;
        let result = store.open_session(999, &RequestContext::default()).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_cleanup_old_sessions() {
        let store = create_test_store().await;
        let user = store.upsert_user("x@unirio.br", "X", None).await.unwrap();
        let recent = store
            .open_session(user.id, &RequestContext::default())
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO user_sessions (user_id, session_start) VALUES (?1, ?2)",
        )
        .bind(user.id)
        .bind(Utc::now() - Duration::days(45))
        .execute(store.pool())
        .await
        .unwrap();

        assert_eq!(store.count_old_sessions(30).await.unwrap(), 1);
        assert_eq!(store.cleanup_old_sessions(30).await.unwrap(), 1);
        assert_eq!(store.count_old_sessions(30).await.unwrap(), 0);
        assert!(store.find_session(recent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = create_test_store().await;
        assert!(store.health_check().await.is_ok());
    }
}
