use crate::storage::{StorageError, StorageResult};
use rust_embed::RustEmbed;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Row, Sqlite};
use std::{collections::HashSet, time::Instant};
use tracing::info;

#[derive(RustEmbed)]
#[folder = "migrations/sqlite"]
pub struct SqliteMigrations;

const TRACKING_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration_name TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    executed_at TIMESTAMP NOT NULL,
    execution_time_ms INTEGER NOT NULL
)
"#;

/// Migration execution result
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub migration_name: String,
    pub execution_time_ms: u64,
    pub checksum: String,
    pub statements_executed: usize,
}

pub fn get_migration_sql(migration_name: &str) -> StorageResult<String> {
    let file = SqliteMigrations::get(migration_name).ok_or_else(|| {
        StorageError::InvalidData(format!("Migration '{}' not found", migration_name))
    })?;

    String::from_utf8(file.data.to_vec()).map_err(|e| {
        StorageError::InvalidData(format!("Invalid UTF-8 in migration file: {}", e))
    })
}

/// Split a script into statements, dropping `--` comment lines
pub fn parse_sql_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|statement| {
            statement
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|statement| !statement.is_empty())
        .map(|statement| format!("{};", statement))
        .collect()
}

/// All embedded migrations, sorted by name
pub fn get_available_migrations() -> Vec<String> {
    let mut migrations: Vec<String> = SqliteMigrations::iter()
        .map(|name| name.to_string())
        .filter(|name| name.ends_with(".sql"))
        .collect();
    migrations.sort();
    migrations
}

pub fn get_pending_migrations(executed: &HashSet<String>) -> Vec<String> {
    get_available_migrations()
        .into_iter()
        .filter(|migration| !executed.contains(migration))
        .collect()
}

pub fn calculate_migration_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn executed_migrations(pool: &Pool<Sqlite>) -> StorageResult<HashSet<String>> {
    let rows = sqlx::query("SELECT migration_name FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Database(format!("Failed to read migrations: {}", e)))?;

    rows.iter()
        .map(|row| {
            row.try_get::<String, _>("migration_name")
                .map_err(|e| StorageError::Database(format!("Bad migration row: {}", e)))
        })
        .collect()
}

/// Apply every embedded migration not yet recorded in `schema_migrations`
pub async fn run_sqlite_migrations(pool: &Pool<Sqlite>) -> StorageResult<Vec<MigrationResult>> {
    sqlx::query(TRACKING_TABLE_SQL)
        .execute(pool)
        .await
        .map_err(|e| {
            StorageError::Database(format!("Failed to create migration table: {}", e))
        })?;

    let executed = executed_migrations(pool).await?;
    let mut results = Vec::new();

    for migration_name in get_pending_migrations(&executed) {
        let started = Instant::now();
        let sql = get_migration_sql(&migration_name)?;
        let checksum = calculate_migration_checksum(&sql);
        let statements = parse_sql_statements(&sql);

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StorageError::Database(format!("Failed to begin migration: {}", e)))?;

        for statement in &statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    StorageError::Database(format!(
                        "Migration '{}' failed: {}",
                        migration_name, e
                    ))
                })?;
        }

        let execution_time_ms = started.elapsed().as_millis() as u64;
        sqlx::query(
            "INSERT INTO schema_migrations (migration_name, checksum, executed_at, execution_time_ms) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&migration_name)
        .bind(&checksum)
        .bind(chrono::Utc::now())
        .bind(execution_time_ms as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Database(format!("Failed to record migration: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Database(format!("Failed to commit migration: {}", e)))?;

        info!(
            migration = %migration_name,
            statements = statements.len(),
            execution_time_ms,
            "Applied migration"
        );

        results.push(MigrationResult {
            migration_name,
            execution_time_ms,
            checksum,
            statements_executed: statements.len(),
        });
    }

    Ok(results)
}
