use async_trait::async_trait;
use pws_bridge::connection::{
    ConnectError, ConnectionManager, ConnectionSettings, ConnectionState, Connector, PublishError,
    Publisher,
};
use pws_bridge::lifecycle::run_pipeline;
use pws_bridge::models::NewCredentials;
use pws_bridge::source::{SerialSource, SyntheticSource};
use pws_bridge::store::CredentialStore;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_retry::strategy::FixedInterval;

/// Stands in for a broker that accepts the first connect attempt.
#[derive(Clone)]
struct AcceptingBroker {
    settings: ConnectionSettings,
    connects: Arc<AtomicUsize>,
    published: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

struct BrokerSession {
    published: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

#[async_trait]
impl Publisher for BrokerSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let _ = self.published.send((topic.to_string(), payload));
        Ok(())
    }
}

#[async_trait]
impl Connector for AcceptingBroker {
    type Session = BrokerSession;

    async fn connect(&self) -> Result<BrokerSession, ConnectError> {
        assert_eq!(self.settings.broker_url(), "tcp://broker.local:1883");
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(BrokerSession {
            published: self.published.clone(),
        })
    }
}

fn stored_credentials() -> (tempfile::TempDir, CredentialStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::open(&dir.path().join("pws.db")).unwrap();
    store.ensure_schema().unwrap();
    store
        .save(&NewCredentials {
            client_id: "dev1".to_string(),
            secret: "pw".to_string(),
            host: "broker.local".to_string(),
        })
        .unwrap();
    (dir, store)
}

#[tokio::test(start_paused = true)]
async fn publishes_synthetic_readings_to_the_device_topic() {
    let (_dir, store) = stored_credentials();
    let creds = store.latest().unwrap();
    let settings = ConnectionSettings::from_credentials(&creds);
    assert_eq!(settings.username, "dev1");
    assert_eq!(settings.password, "pw");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let broker = AcceptingBroker {
        settings,
        connects: Arc::new(AtomicUsize::new(0)),
        published: tx,
    };
    let manager = ConnectionManager::new(broker.clone(), FixedInterval::from_millis(0));
    let mut states = manager.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let pipeline = tokio::spawn(run_pipeline(
        manager,
        SyntheticSource::with_seed(3),
        creds.sensor_topic(),
        async move {
            let _ = stop_rx.await;
        },
    ));

    for _ in 0..3 {
        let (topic, payload) = rx.recv().await.unwrap();
        assert_eq!(topic, "devices/dev1/sensors");
        let decoded: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(decoded["value"].is_i64());
    }
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);
    assert_eq!(broker.connects.load(Ordering::SeqCst), 1);

    stop_tx.send(()).unwrap();
    pipeline.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn serial_lines_flow_through_to_the_broker() {
    let (_dir, store) = stored_credentials();
    let creds = store.latest().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let broker = AcceptingBroker {
        settings: ConnectionSettings::from_credentials(&creds),
        connects: Arc::new(AtomicUsize::new(0)),
        published: tx,
    };
    let manager = ConnectionManager::new(broker, FixedInterval::from_millis(0));
    let source = SerialSource::new("fake", Cursor::new(b"12\nabc\n7\n".to_vec()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let pipeline = tokio::spawn(run_pipeline(manager, source, creds.sensor_topic(), async move {
        let _ = stop_rx.await;
    }));

    let mut values = Vec::new();
    for _ in 0..2 {
        let (_, payload) = rx.recv().await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        values.push(decoded["value"].as_i64().unwrap());
    }
    assert_eq!(values, vec![12, 7]);

    stop_tx.send(()).unwrap();
    pipeline.await.unwrap().unwrap();
    assert!(rx.try_recv().is_err());
}
