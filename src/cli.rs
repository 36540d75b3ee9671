use crate::config::SourceMode;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "pws",
    version,
    about = "Plant Watering System telemetry bridge",
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set the credentials for the MQTT broker
    Auth {
        /// MQTT client id, also used as the username
        #[arg(long, visible_alias = "usr")]
        username: String,
        /// Shared secret for the broker
        #[arg(long, visible_alias = "pwd")]
        password: String,
        /// Broker host name or address (port 1883 is implied)
        #[arg(long)]
        host: String,
    },
    /// Provision the device
    #[command(visible_alias = "purl")]
    ProvisionUrl {
        url: Option<String>,
    },
    /// Run the telemetry pipeline until SIGINT/SIGTERM
    Run {
        /// Sample source, overrides PWS_SAMPLE_SOURCE
        #[arg(long, value_enum)]
        source: Option<SourceMode>,
        /// Serial device path, overrides PWS_SERIAL_PORT and skips discovery
        #[arg(long)]
        port: Option<String>,
    },
    /// Create the credentials table if it is missing
    Migrate,
}
