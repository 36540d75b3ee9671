use crate::connection::Publisher;
use crate::error::BridgeError;
use crate::models::TelemetryReading;
use crate::source::{Sample, SampleSource};
use std::sync::Arc;
use tokio::task;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// Reads one sample per tick and publishes it, QoS 0, not retained.
pub struct PublishLoop<S, P> {
    source: S,
    publisher: Arc<P>,
    topic: String,
    interval: Duration,
}

impl<S, P> PublishLoop<S, P>
where
    S: SampleSource,
    P: Publisher + 'static,
{
    pub fn new(source: S, publisher: Arc<P>, topic: impl Into<String>) -> Self {
        Self {
            source,
            publisher,
            topic: topic.into(),
            interval: PUBLISH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until the sample source fails. Publish failures are logged and
    /// the loop moves on to the next tick.
    pub async fn run(self) -> Result<(), BridgeError> {
        let PublishLoop {
            mut source,
            publisher,
            topic,
            interval,
        } = self;

        info!("Publishing {} samples to '{}'.", source.describe(), topic);

        loop {
            let (returned, sample) = task::spawn_blocking(move || {
                let sample = source.next_sample();
                (source, sample)
            })
            .await?;
            source = returned;

            match sample? {
                Sample::Value(value) => {
                    publish_reading(publisher.as_ref(), &topic, TelemetryReading { value }).await;
                    sleep(interval).await;
                }
                Sample::Malformed(line) => {
                    // No sleep: the next line may already be waiting.
                    debug!("Discarding malformed sensor line '{}'.", line);
                }
                Sample::Idle => {}
                Sample::Exhausted => {
                    sleep(interval).await;
                }
            }
        }
    }
}

async fn publish_reading<P: Publisher + ?Sized>(
    publisher: &P,
    topic: &str,
    reading: TelemetryReading,
) {
    let payload = match reading.to_payload() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode reading {:?}: {}", reading, e);
            return;
        }
    };

    match publisher.publish(topic, payload).await {
        Ok(_) => debug!("Message published to '{}': {}", topic, reading.value),
        Err(e) => error!("Failed to publish message to '{}': {}", topic, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PublishError;
    use crate::source::{SerialSource, SyntheticSource};
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    type Sent = (String, Vec<u8>, Instant);

    struct RecordingPublisher {
        tx: mpsc::UnboundedSender<Sent>,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl RecordingPublisher {
        fn new(fail_first: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Sent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let publisher = Arc::new(Self {
                tx,
                fail_first,
                calls: AtomicUsize::new(0),
            });
            (publisher, rx)
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.tx.send((topic.to_string(), payload, Instant::now()));
            if call < self.fail_first {
                let err = serde_json::from_str::<i64>("not json").unwrap_err();
                return Err(PublishError::Encode(err));
            }
            Ok(())
        }
    }

    fn value_of(payload: &[u8]) -> i64 {
        let decoded: serde_json::Value = serde_json::from_slice(payload).unwrap();
        decoded["value"].as_i64().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_lines_are_skipped_without_extra_delay() {
        let (publisher, mut rx) = RecordingPublisher::new(0);
        let source = SerialSource::new("test", Cursor::new(b"12\nabc\n7\n".to_vec()));
        let handle = tokio::spawn(
            PublishLoop::new(source, publisher.clone(), "devices/dev1/sensors").run(),
        );

        let (topic, first, first_at) = rx.recv().await.unwrap();
        let (_, second, second_at) = rx.recv().await.unwrap();

        assert_eq!(topic, "devices/dev1/sensors");
        assert_eq!(value_of(&first), 12);
        assert_eq!(value_of(&second), 7);

        let gap = second_at - first_at;
        assert!(gap >= PUBLISH_INTERVAL);
        assert!(gap < PUBLISH_INTERVAL * 2, "malformed line added delay: {:?}", gap);

        // The stream is exhausted; nothing else gets published.
        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_does_not_stop_the_loop() {
        let (publisher, mut rx) = RecordingPublisher::new(1);
        let handle = tokio::spawn(
            PublishLoop::new(SyntheticSource::with_seed(1), publisher.clone(), "t").run(),
        );

        let (_, first, _) = rx.recv().await.unwrap();
        let (_, second, _) = rx.recv().await.unwrap();
        assert!((0..100).contains(&value_of(&first)));
        assert!((0..100).contains(&value_of(&second)));
        assert!(publisher.calls.load(Ordering::SeqCst) >= 2);

        handle.abort();
    }

    #[tokio::test]
    async fn serial_read_error_ends_the_loop() {
        struct Unplugged;

        impl std::io::Read for Unplugged {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
            }
        }

        let (publisher, _rx) = RecordingPublisher::new(0);
        let result = PublishLoop::new(SerialSource::new("test", Unplugged), publisher, "t")
            .with_interval(Duration::from_millis(1))
            .run()
            .await;

        assert!(matches!(result, Err(BridgeError::Serial(_))));
    }
}
