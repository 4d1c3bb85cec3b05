//! Fixed-interval polling of a bounding box.

use crate::client::{BoundingBox, BoundsError, ClientConfig, ClientError, OpenSkyClient};
use crate::protocol::{self, ParseError};
use crate::types::Response;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Invalid bounding box: {0}")]
    Bounds(#[from] BoundsError),
}

/// Statistics for the tracker.
#[derive(Debug, Default)]
pub struct TrackerStats {
    pub fetches: AtomicU64,
    pub states_decoded: AtomicU64,
    pub records_dropped: AtomicU64,
    pub errors: AtomicU64,
    pub bytes_received: AtomicU64,
    pub last_fetch_ms: AtomicU64,
}

impl TrackerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            states_decoded: self.states_decoded.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            last_fetch_ms: self.last_fetch_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub fetches: u64,
    pub states_decoded: u64,
    pub records_dropped: u64,
    pub errors: u64,
    pub bytes_received: u64,
    pub last_fetch_ms: u64,
}

/// Configuration for the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Interval between polls
    pub poll_interval: Duration,
    /// Area to monitor
    pub bbox: BoundingBox,
    /// Decoded responses buffered for the consumer
    pub buffer_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            bbox: BoundingBox::GLOBAL,
            buffer_size: 16,
        }
    }
}

/// Polls OpenSky and hands every decoded snapshot to a consumer.
pub struct Tracker {
    client: OpenSkyClient,
    config: TrackerConfig,
    stats: Arc<TrackerStats>,
    running: Arc<AtomicBool>,
}

impl Tracker {
    /// Create a new tracker. Fails if the configured area is invalid.
    pub fn new(client: OpenSkyClient, config: TrackerConfig) -> Result<Self, TrackerError> {
        config.bbox.validate()?;

        Ok(Self {
            client,
            config,
            stats: Arc::new(TrackerStats::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a reference to the tracker stats.
    pub fn stats(&self) -> Arc<TrackerStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Check if the tracker is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the tracker. A poll already in flight finishes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Channel sized for this tracker's output.
    pub fn channel(&self) -> (mpsc::Sender<Response>, mpsc::Receiver<Response>) {
        mpsc::channel(self.config.buffer_size.max(1))
    }

    /// Poll until stopped or until the consumer goes away.
    ///
    /// A failed poll is logged and counted; the next tick polls again.
    pub async fn run(&self, tx: mpsc::Sender<Response>) -> Result<(), TrackerError> {
        self.running.store(true, Ordering::SeqCst);

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.running.load(Ordering::Relaxed) {
            interval.tick().await;
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            match self.poll().await {
                Ok(response) => {
                    if tx.send(response).await.is_err() {
                        tracing::warn!("Response channel closed");
                        break;
                    }
                }
                Err(TrackerError::Client(ClientError::RateLimited { retry_after })) => {
                    tracing::warn!("Rate limited by OpenSky, retry hint {:?}", retry_after);
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!("Poll error: {}", e);
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Fetch and decode one snapshot.
    pub async fn poll(&self) -> Result<Response, TrackerError> {
        let start = Instant::now();
        let data = self.client.fetch(self.config.bbox).await?;

        self.stats
            .last_fetch_ms
            .store(start.elapsed().as_millis() as u64, Ordering::Relaxed);

        self.ingest(&data)
    }

    /// Decode a response body and account for it in the stats.
    pub fn ingest(&self, data: &[u8]) -> Result<Response, TrackerError> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let raw = protocol::parse_response(data)?;
        let decoded = protocol::decode_response(&raw);

        self.stats
            .states_decoded
            .fetch_add(decoded.response.states.len() as u64, Ordering::Relaxed);
        let dropped = decoded.failures.iter().filter(|e| e.index().is_some()).count();
        self.stats
            .records_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);

        tracing::debug!(
            "Decoded {} states, dropped {} ({} bytes)",
            decoded.response.states.len(),
            dropped,
            data.len()
        );

        Ok(decoded.response)
    }
}

/// Builder for creating a Tracker with custom configuration.
pub struct TrackerBuilder {
    client_config: ClientConfig,
    tracker_config: TrackerConfig,
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self {
            client_config: ClientConfig::default(),
            tracker_config: TrackerConfig::default(),
        }
    }

    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.tracker_config.poll_interval = interval;
        self
    }

    pub fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.tracker_config.bbox = bbox;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.tracker_config.buffer_size = size;
        self
    }

    pub fn build(self) -> Result<Tracker, TrackerError> {
        // Reject a bad area before building the HTTP client
        self.tracker_config.bbox.validate()?;

        let client = OpenSkyClient::new(self.client_config)?;
        Tracker::new(client, self.tracker_config)
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"time": 1643623949, "states": [
        ["7c7f38", "ZEY     ", "Australia", 1643623948, 1643623948, 144.7732,
         -37.9141, 403.86, false, 50.46, 357.66, -0.65, null, 312.42, "2502",
         false, 3],
        ["7c7f39", null, "Australia"]
    ]}"#;

    fn tracker() -> Tracker {
        TrackerBuilder::new()
            .bbox(BoundingBox::new(-40.110403, -24.267845, 139.147805, 154.590532))
            .poll_interval(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_bbox() {
        let result = TrackerBuilder::new()
            .bbox(BoundingBox::new(0.0, 1.0, 10.0, -10.0))
            .build();
        assert!(matches!(
            result,
            Err(TrackerError::Bounds(BoundsError::LongitudeOrder { .. }))
        ));
    }

    #[test]
    fn test_ingest_counts_drops() {
        let tracker = tracker();
        let response = tracker.ingest(BODY.as_bytes()).unwrap();

        assert_eq!(response.states.len(), 1);
        assert_eq!(response.states[0].icao24, "7c7f38");

        let stats = tracker.stats().snapshot();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.states_decoded, 1);
        assert_eq!(stats.records_dropped, 1);
        assert_eq!(stats.bytes_received, BODY.len() as u64);
    }

    #[test]
    fn test_ingest_rejects_error_page() {
        let tracker = tracker();
        let err = tracker.ingest(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, TrackerError::Parse(ParseError::ServerResponse(_))));
        assert_eq!(tracker.stats().snapshot().states_decoded, 0);
    }

    #[test]
    fn test_ingest_keeps_states_without_time() {
        let tracker = tracker();
        let body = BODY.replace("1643623949", "\"soon\"");
        let response = tracker.ingest(body.as_bytes()).unwrap();

        assert_eq!(response.time, None);
        assert_eq!(response.states.len(), 1);
        assert_eq!(tracker.stats().snapshot().records_dropped, 1);
    }

    #[tokio::test]
    async fn test_stop_while_running() {
        let tracker = TrackerBuilder::new()
            .client_config(
                ClientConfig::new()
                    .with_base_url("http://127.0.0.1:9".to_string())
                    .with_timeout(Duration::from_secs(1)),
            )
            .poll_interval(Duration::from_millis(20))
            .build()
            .unwrap();
        let tracker = Arc::new(tracker);
        let (tx, _rx) = tracker.channel();

        let handle = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.run(tx).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tracker.is_running());
        tracker.stop();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("tracker did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(!tracker.is_running());
        assert!(tracker.stats().snapshot().errors >= 1);
    }

    #[test]
    fn test_stop_before_run() {
        let tracker = tracker();
        assert!(!tracker.is_running());
        tracker.stop();
        assert!(!tracker.is_running());
        assert_eq!(tracker.config().poll_interval, Duration::from_secs(1));
    }
}
