//! Result sink - publication of sealed window results
//!
//! Publication runs on its own task, fed by a bounded channel, so a slow or
//! unavailable downstream never stalls window accumulation. Transport
//! failures are retried with exponential backoff; once the retry budget is
//! spent the result is dropped and counted.

use super::backoff::{BackoffSettings, ExponentialBackoff};
use super::stats::PipelineStats;
use super::types::{AggregateResult, PartitionKey};
use crate::transport::{LogProducer, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum PublishError {
    Transport(TransportError),
    Serialization(serde_json::Error),
}

impl PublishError {
    /// Serialization failures would fail identically on every attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Transport(_))
    }
}

impl From<TransportError> for PublishError {
    fn from(err: TransportError) -> Self {
        PublishError::Transport(err)
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err)
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Transport(e) => write!(f, "Transport error: {}", e),
            PublishError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PublishError {}

/// A result handed from the scheduler to the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub key: PartitionKey,
    pub result: AggregateResult,
}

/// Output wire format: one JSON object per window
pub fn encode_result(result: &AggregateResult) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(result)
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, emission: &Emission) -> Result<(), PublishError>;

    /// Sink type for logging
    fn sink_type(&self) -> &'static str;
}

/// Produces results to an output topic, keyed by partition
pub struct TopicSink {
    producer: Arc<dyn LogProducer>,
    topic: String,
}

impl TopicSink {
    pub fn new(producer: Arc<dyn LogProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl ResultSink for TopicSink {
    async fn publish(&self, emission: &Emission) -> Result<(), PublishError> {
        let payload = encode_result(&emission.result)?;
        let seq = self
            .producer
            .produce(&self.topic, Some(emission.key), &payload)
            .await?;
        log::debug!("Produced window result to {} at seq {}", self.topic, seq);
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "topic"
    }
}

/// Logs every result after the wrapped sink accepted it
pub struct EchoingSink {
    inner: Box<dyn ResultSink>,
}

impl EchoingSink {
    pub fn new(inner: Box<dyn ResultSink>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ResultSink for EchoingSink {
    async fn publish(&self, emission: &Emission) -> Result<(), PublishError> {
        self.inner.publish(emission).await?;
        let line = encode_result(&emission.result)?;
        log::info!("📤 {}", String::from_utf8_lossy(&line));
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        self.inner.sink_type()
    }
}

/// Publish one emission, retrying retryable failures with backoff
///
/// Returns the last error once retries are exhausted.
pub async fn publish_with_retry(
    sink: &dyn ResultSink,
    emission: &Emission,
    backoff: BackoffSettings,
    stats: &PipelineStats,
) -> Result<(), PublishError> {
    let mut backoff = ExponentialBackoff::new(backoff);

    loop {
        match sink.publish(emission).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => {
                log::warn!(
                    "⚠️  Publish of window ending {} failed: {}",
                    emission.result.window_end_time,
                    e
                );
                if backoff.sleep().await.is_err() {
                    return Err(e);
                }
                stats.record_publish_retries(1);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Publisher task: drains the emission channel until every sender is gone
pub async fn start_result_publisher(
    mut rx: mpsc::Receiver<Emission>,
    sink: Arc<dyn ResultSink>,
    backoff: BackoffSettings,
    stats: Arc<PipelineStats>,
) {
    log::info!("🚀 Starting result publisher ({} sink)", sink.sink_type());

    while let Some(emission) = rx.recv().await {
        match publish_with_retry(sink.as_ref(), &emission, backoff, &stats).await {
            Ok(()) => {
                stats.record_published(1);
            }
            Err(e) => {
                stats.record_publish_failures(1);
                log::error!(
                    "❌ Giving up on window ending {} ({:?}): {}",
                    emission.result.window_end_time,
                    emission.result,
                    e
                );
            }
        }
    }

    log::info!("✅ Result publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::GLOBAL_PARTITION;
    use crate::transport::InMemoryEventLog;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn emission(end: i64) -> Emission {
        Emission {
            key: GLOBAL_PARTITION,
            result: AggregateResult {
                total_appointments: 2,
                unique_patients: 1,
                active_doctors: 2,
                window_end_time: end,
            },
        }
    }

    fn fast_backoff(retries: u32) -> BackoffSettings {
        BackoffSettings {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            max_retries: retries,
        }
    }

    /// Fails the first `failures` publishes, then records the rest
    struct FlakySink {
        failures: AtomicU32,
        published: Mutex<Vec<i64>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResultSink for FlakySink {
        async fn publish(&self, emission: &Emission) -> Result<(), PublishError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PublishError::Transport(TransportError::Closed));
            }
            self.published.lock().unwrap().push(emission.result.window_end_time);
            Ok(())
        }

        fn sink_type(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_encode_result_matches_wire_format() {
        let payload = encode_result(&emission(60_000).result).unwrap();
        assert_eq!(
            String::from_utf8(payload).unwrap(),
            r#"{"totalAppointments":2,"uniquePatients":1,"activeDoctors":2,"windowEndTime":60000}"#
        );
    }

    #[tokio::test]
    async fn test_topic_sink_produces_keyed_json() {
        let log = InMemoryEventLog::new();
        let sink = TopicSink::new(Arc::new(log.clone()), "analytics-results");

        sink.publish(&emission(60_000)).await.unwrap();

        let records = log.records("analytics-results");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("all"));
        let decoded: AggregateResult = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(decoded, emission(60_000).result);
    }

    #[tokio::test]
    async fn test_echoing_sink_delegates() {
        let log = InMemoryEventLog::new();
        let sink = EchoingSink::new(Box::new(TopicSink::new(Arc::new(log.clone()), "out")));

        sink.publish(&emission(1)).await.unwrap();

        assert_eq!(sink.sink_type(), "topic");
        assert_eq!(log.records("out").len(), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let sink = FlakySink::new(2);
        let stats = PipelineStats::new();

        publish_with_retry(&sink, &emission(60_000), fast_backoff(5), &stats)
            .await
            .unwrap();

        assert_eq!(*sink.published.lock().unwrap(), vec![60_000]);
        assert_eq!(stats.snapshot().publish_retries, 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let sink = FlakySink::new(10);
        let stats = PipelineStats::new();

        let result = publish_with_retry(&sink, &emission(60_000), fast_backoff(3), &stats).await;

        assert!(matches!(result, Err(PublishError::Transport(_))));
        assert!(sink.published.lock().unwrap().is_empty());
        assert_eq!(stats.snapshot().publish_retries, 3);
    }

    #[tokio::test]
    async fn test_publisher_continues_after_giving_up() {
        // Test: An exhausted publish is counted and later results still go out
        let sink = Arc::new(FlakySink::new(2));
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = mpsc::channel(8);

        tx.send(emission(60_000)).await.unwrap();
        tx.send(emission(120_000)).await.unwrap();
        drop(tx);

        start_result_publisher(rx, sink.clone(), fast_backoff(1), stats.clone()).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.results_published, 1);
        assert_eq!(*sink.published.lock().unwrap(), vec![120_000]);
    }
}
