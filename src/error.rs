use crate::config::ConfigError;
use crate::connection::ConnectError;
use crate::serial::SerialError;
use crate::store::StoreError;
use thiserror::Error;

/// Everything that can stop a command. All of these are fatal to the process.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Serial(#[from] SerialError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}
