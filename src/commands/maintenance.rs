use crate::{Config, auth::StateStore, storage::create_store};
use clap::Subcommand;
use std::time::Duration;
use tracing::info;

#[derive(Subcommand)]
pub enum MaintenanceTask {
    /// Delete expired or malformed OAuth state files
    PurgeStates {
        #[arg(
            long,
            help = "Dry run - show what would be deleted without actually deleting"
        )]
        dry_run: bool,
    },
    /// Delete usage sessions older than the retention period
    CleanupSessions {
        #[arg(long, help = "Retention period in days", default_value = "30")]
        days: u32,
        #[arg(
            long,
            help = "Dry run - show what would be deleted without actually deleting"
        )]
        dry_run: bool,
    },
}

pub async fn handle_maintenance_command(
    task: MaintenanceTask,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match task {
        MaintenanceTask::PurgeStates { dry_run } => {
            let store = StateStore::new(
                config.state.resolved_dir(),
                Duration::from_secs(config.state.ttl_seconds),
            );
            info!(
                "Purging OAuth state files in {} (dry_run: {})...",
                store.dir().display(),
                dry_run
            );

            if dry_run {
                let count = store.count_expired()?;
                info!("Dry run: {} state files would be deleted", count);
            } else {
                let count = store.purge_expired()?;
                info!("Purge completed: {} state files deleted", count);
            }
        }
        MaintenanceTask::CleanupSessions { days, dry_run } => {
            info!(
                "Cleaning up usage sessions older than {} days (dry_run: {})...",
                days, dry_run
            );

            let store = create_store(&config.database.url).await?;
            store.migrate().await?;

            if dry_run {
                let count = store.count_old_sessions(days).await?;
                info!("Dry run: {} sessions would be deleted", count);
            } else {
                let count = store.cleanup_old_sessions(days).await?;
                info!("Cleanup completed: {} sessions deleted", count);
            }
        }
    }

    Ok(())
}
