use clap::Parser;
use pws_bridge::cli::{Cli, Commands};
use pws_bridge::config::Config;
use pws_bridge::error::BridgeError;
use pws_bridge::lifecycle;
use pws_bridge::models::NewCredentials;
use pws_bridge::store::CredentialStore;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let level = config
        .as_ref()
        .map(|cfg| cfg.log_level)
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, config: &Config) -> Result<(), BridgeError> {
    match command {
        Commands::Auth {
            username,
            password,
            host,
        } => {
            let store = open_store(config)?;
            store.ensure_schema()?;
            store.save(&NewCredentials {
                client_id: username,
                secret: password,
                host,
            })?;
            println!("auth credentials set");
        }
        Commands::ProvisionUrl { url } => {
            println!("provision url: {}", url.unwrap_or_default());
        }
        Commands::Run { source, port } => {
            let store = open_store(config)?;
            let mode = source.unwrap_or(config.sample_source);
            let port = port.or_else(|| config.serial_port.clone());
            info!("Running the application (sample source: {}).", mode);
            lifecycle::run(&store, mode, port.as_deref()).await?;
            info!("All services shut down successfully.");
        }
        Commands::Migrate => {
            let store = open_store(config)?;
            println!("migrating the database");
            store.ensure_schema()?;
            println!("migrated the database");
        }
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<CredentialStore, BridgeError> {
    info!("Opening database at {}.", config.db_path.display());
    Ok(CredentialStore::open(&config.db_path)?)
}
