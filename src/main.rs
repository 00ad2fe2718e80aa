use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use darkroom::queue::{JobHandlers, JobRepository};
use darkroom::storage_template::get_storage_template_options;
use darkroom::system_config::{FileConfigRepository, SystemConfig, SystemConfigCore};
use darkroom::utils::init_logger;
use darkroom::{AppState, Config};

#[derive(Parser)]
#[command(name = "darkroom")]
#[command(about = "Background job engine and system configuration for Darkroom")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the job engine and keep it running until interrupted
    Run,

    /// Print the built-in default configuration
    Defaults,

    /// Validate a configuration file without starting anything
    Check { file: PathBuf },

    /// Print the storage template tokens and presets
    TemplateOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run().await,
        Commands::Defaults => {
            println!("{}", defaults_json()?);
            Ok(())
        }
        Commands::Check { file } => check(file).await,
        Commands::TemplateOptions => {
            println!("{}", serde_json::to_string_pretty(&get_storage_template_options())?);
            Ok(())
        }
    }
}

fn defaults_json() -> Result<String> {
    Ok(serde_json::to_string_pretty(&SystemConfig::default())?)
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let state = AppState::bootstrap(config)
        .await
        .context("Failed to initialize")?;

    state.system_config.refresh_config().await?;
    state
        .job_service
        .register_handlers(JobHandlers::new())
        .await?;

    let mut changes = state.system_config.subscribe();
    tokio::spawn(async move {
        while let Some(config) = changes.next().await {
            info!(
                "System config active (template: {})",
                config.storage_template.template
            );
        }
    });

    info!("Job engine running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    match state.job_service.get_all_jobs_status().await {
        Ok(status) => info!("Final queue status: {}", serde_json::to_string(&status)?),
        Err(e) => error!("Failed to read queue status: {}", e),
    }
    Ok(())
}

async fn check(file: PathBuf) -> Result<()> {
    let core = SystemConfigCore::new(
        Arc::new(FileConfigRepository::new()),
        JobRepository::new(),
        Some(file.clone()),
    );

    let config = core
        .get_config()
        .await
        .with_context(|| format!("{} is not a valid configuration", file.display()))?;
    let sample = darkroom::storage_template::validate_template(&config.storage_template.template)?;

    println!("{} is valid", file.display());
    println!("A sample image would be stored at {}", sample);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_command() {
        let cli = Cli::try_parse_from(["darkroom", "defaults"]).unwrap();
        assert!(matches!(cli.command, Commands::Defaults));

        let printed: SystemConfig = serde_json::from_str(&defaults_json().unwrap()).unwrap();
        assert_eq!(printed, SystemConfig::default());
    }

    #[test]
    fn test_check_takes_a_file() {
        let cli = Cli::try_parse_from(["darkroom", "check", "/etc/darkroom.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { file } if file == PathBuf::from("/etc/darkroom.json")));
    }
}
