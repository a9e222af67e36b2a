use crate::{
    Config,
    storage::{SqliteStore, migrations::run_sqlite_migrations},
};
use tracing::info;

pub async fn handle_migrate_command(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let url = &config.database.url;
    if url == "memory" || url.starts_with("memory://") {
        info!("In-memory store configured, nothing to migrate");
        return Ok(());
    }

    info!("Running pending migrations...");
    let store = SqliteStore::new(url).await?;
    let applied = run_sqlite_migrations(store.pool()).await?;

    if applied.is_empty() {
        info!("Database schema is up to date");
    }
    for migration in &applied {
        println!(
            "applied {} ({} statements, {} ms)",
            migration.migration_name, migration.statements_executed, migration.execution_time_ms
        );
    }
    info!("All migrations completed successfully");
    Ok(())
}
