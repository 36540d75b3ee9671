use crate::config::SourceMode;
use crate::connection::{
    fixed_retry, ConnectionManager, ConnectionSettings, ConnectionState, Connector, MqttConnector,
};
use crate::error::BridgeError;
use crate::publisher::PublishLoop;
use crate::source::{open_source, SampleSource};
use crate::store::CredentialStore;
use std::future::Future;
use tokio::time::Duration;
use tracing::{error, info};

/// SIGINT/SIGTERM, installed before any pipeline work starts.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn register() -> Result<Self, BridgeError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let interrupt = signal(SignalKind::interrupt()).map_err(BridgeError::Signal)?;
            let terminate = signal(SignalKind::terminate()).map_err(BridgeError::Signal)?;
            Ok(Self {
                interrupt,
                terminate,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    pub async fn recv(mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => info!("Received SIGINT."),
                _ = self.terminate.recv() => info!("Received SIGTERM."),
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to handle termination signal: {:?}", e);
            }
        }
    }
}

/// The `run` command: load credentials, pick the sample source, connect and
/// publish until a termination signal arrives.
pub async fn run(
    store: &CredentialStore,
    mode: SourceMode,
    serial_port: Option<&str>,
) -> Result<(), BridgeError> {
    let shutdown = ShutdownSignal::register()?;

    store.ensure_schema()?;
    let creds = store.latest()?;
    info!(
        "Loaded broker credentials for '{}' (id {}).",
        creds.client_id, creds.id
    );

    let source = open_source(mode, serial_port)?;

    let settings = ConnectionSettings::from_credentials(&creds);
    info!("Broker address: {}", settings.broker_url());
    let manager = ConnectionManager::new(MqttConnector::new(settings), fixed_retry());

    run_pipeline(manager, source, creds.sensor_topic(), shutdown.recv()).await
}

/// Spawns connect-then-publish and waits for `shutdown`. The pipeline task is
/// aborted on shutdown, which drops the broker session and the sample source.
pub async fn run_pipeline<C, R, S, F>(
    manager: ConnectionManager<C, R>,
    source: S,
    topic: String,
    shutdown: F,
) -> Result<(), BridgeError>
where
    C: Connector + 'static,
    R: IntoIterator<Item = Duration> + Clone + Send + Sync + 'static,
    R::IntoIter: Send,
    S: SampleSource,
    F: Future<Output = ()>,
{
    let mut states = manager.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!("Connection state: {:?}", state);
            if state == ConnectionState::Connected {
                break;
            }
        }
    });

    let mut pipeline = tokio::spawn(async move {
        let session = manager.connect().await?;
        PublishLoop::new(source, session, topic).run().await
    });

    tokio::select! {
        _ = shutdown => {
            info!("Shutting down...");
            pipeline.abort();
            // Cancelled is the expected outcome here.
            let _ = pipeline.await;
            info!("Pipeline stopped.");
            Ok(())
        }
        outcome = &mut pipeline => {
            let result = outcome.map_err(BridgeError::from).and_then(|r| r);
            if let Err(e) = &result {
                error!("Pipeline stopped: {}", e);
            }
            result
        }
    }
}
