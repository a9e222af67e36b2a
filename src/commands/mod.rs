pub mod maintenance;
pub mod migrate;

use crate::Config;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Clean up state files and old usage sessions
    Maintenance {
        #[command(subcommand)]
        task: maintenance::MaintenanceTask,
    },
}

pub async fn handle_command(
    command: Commands,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Migrate => migrate::handle_migrate_command(config).await,
        Commands::Maintenance { task } => {
            maintenance::handle_maintenance_command(task, config).await
        }
    }
}
