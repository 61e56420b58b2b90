//! Live Tail Poll Loop

use crate::sink::{latest_channel, BatchSink, TailReceiver};
use std::sync::Arc;
use std::time::Duration;
use storage::Repository;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for live tails
#[derive(Debug, Clone)]
pub struct LiveTailConfig {
    /// Time between polls (default: 5s)
    pub interval: Duration,
    /// Records per push (default: 10)
    pub batch_size: u32,
}

impl Default for LiveTailConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 10,
        }
    }
}

/// Why a live tail stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailEnd {
    /// Cancellation token fired (client gone or server shutdown)
    Cancelled,
    /// A push failed
    SinkClosed,
}

/// Polls the record store on behalf of live-tail clients
pub struct LiveTail {
    repository: Repository,
    config: LiveTailConfig,
}

impl LiveTail {
    pub fn new(repository: Repository, config: LiveTailConfig) -> Self {
        info!("Creating live tail with config: {:?}", config);
        Self { repository, config }
    }

    /// Poll and push until cancelled or the sink fails.
    ///
    /// The first poll happens immediately. Cancellation is observed while
    /// waiting for a tick and while a push is in flight, so a client that
    /// stops reading cannot hold the loop open.
    pub async fn run<S: BatchSink>(
        &self,
        sensor_id: &str,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> TailEnd {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        metrics::gauge!("live_tail_connections").increment(1.0);
        debug!(sensor_id, "Live tail started");

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break TailEnd::Cancelled,
                _ = ticker.tick() => {}
            }

            let batch = match self
                .repository
                .latest_records(sensor_id, self.config.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(sensor_id, error = %e, "Live tail query failed, skipping tick");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break TailEnd::Cancelled,
                pushed = sink.push(&batch) => {
                    if let Err(e) = pushed {
                        debug!(sensor_id, error = %e, "Live tail push failed");
                        break TailEnd::SinkClosed;
                    }
                }
            }
        };

        metrics::gauge!("live_tail_connections").decrement(1.0);
        debug!(sensor_id, ?end, "Live tail stopped");
        end
    }

    /// Open a tail as a stream of batches.
    ///
    /// Only the newest poll result is kept for the reader; older unread
    /// batches are overwritten. The stream ends when `cancel` fires or the
    /// receiver is dropped.
    pub fn open(
        self: &Arc<Self>,
        sensor_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> TailReceiver {
        let (mut sink, rx) = latest_channel();
        let tail = Arc::clone(self);
        let sensor_id = sensor_id.into();

        tokio::spawn(async move {
            tail.run(&sensor_id, &mut sink, &cancel).await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use storage::{NewRecord, Record, SensorFields};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
    }

    async fn seeded(count: i64) -> (Repository, String) {
        let repo = Repository::in_memory().await.unwrap();
        let sensor = repo
            .create_sensor(SensorFields {
                sensor_type: "temperature".to_string(),
                unit: "C".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        for i in 0..count {
            insert(&repo, &sensor.id, i as f64, at(i)).await;
        }
        (repo, sensor.id)
    }

    async fn insert(repo: &Repository, sensor_id: &str, value: f64, ts: DateTime<Utc>) {
        repo.insert_record(NewRecord {
            sensor_id: sensor_id.to_string(),
            value,
            timestamp: ts,
        })
        .await
        .unwrap();
    }

    /// Records pushes and cancels after a fixed number of them
    struct RecordingSink {
        batches: Vec<Vec<Record>>,
        cancel_after: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn push(&mut self, batch: &[Record]) -> Result<(), SinkError> {
            self.batches.push(batch.to_vec());
            if self.batches.len() >= self.cancel_after {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    struct FailingSink {
        attempts: usize,
    }

    #[async_trait]
    impl BatchSink for FailingSink {
        async fn push(&mut self, _batch: &[Record]) -> Result<(), SinkError> {
            self.attempts += 1;
            Err(SinkError("connection reset".to_string()))
        }
    }

    /// A client that never finishes reading
    struct StuckSink;

    #[async_trait]
    impl BatchSink for StuckSink {
        async fn push(&mut self, _batch: &[Record]) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    fn fast() -> LiveTailConfig {
        LiveTailConfig {
            interval: Duration::from_millis(20),
            batch_size: 10,
        }
    }

    fn values(batch: &[Record]) -> Vec<f64> {
        batch.iter().map(|r| r.value).collect()
    }

    #[tokio::test]
    async fn test_first_push_is_latest_window() {
        let (repo, sensor_id) = seeded(15).await;
        let tail = Arc::new(LiveTail::new(repo.clone(), fast()));
        let cancel = CancellationToken::new();

        let mut rx = tail.open(&sensor_id, cancel.clone());
        let first = rx.recv().await.unwrap();

        assert_eq!(first.len(), 10);
        assert_eq!(
            values(&first),
            vec![14.0, 13.0, 12.0, 11.0, 10.0, 9.0, 8.0, 7.0, 6.0, 5.0]
        );

        insert(&repo, &sensor_id, 15.0, at(15)).await;

        // A tick may already have been taken before the insert landed.
        let mut newest = None;
        for _ in 0..5 {
            let batch = rx.recv().await.unwrap();
            assert_eq!(batch.len(), 10);
            if batch[0].value == 15.0 {
                newest = Some(batch);
                break;
            }
        }
        let newest = newest.expect("new reading never pushed");
        assert_eq!(values(&newest)[..2], [15.0, 14.0]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stops_after_cancellation() {
        let (repo, sensor_id) = seeded(3).await;
        let tail = LiveTail::new(repo, fast());
        let cancel = CancellationToken::new();
        let mut sink = RecordingSink {
            batches: Vec::new(),
            cancel_after: 2,
            cancel: cancel.clone(),
        };

        let end = tail.run(&sensor_id, &mut sink, &cancel).await;

        assert_eq!(end, TailEnd::Cancelled);
        assert_eq!(sink.batches.len(), 2);
        assert!(sink.batches.iter().all(|b| values(b) == vec![2.0, 1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_pushes() {
        let (repo, sensor_id) = seeded(3).await;
        let tail = LiveTail::new(repo, fast());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = RecordingSink {
            batches: Vec::new(),
            cancel_after: usize::MAX,
            cancel: cancel.clone(),
        };

        let end = tail.run(&sensor_id, &mut sink, &cancel).await;

        assert_eq!(end, TailEnd::Cancelled);
        assert!(sink.batches.is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_ends_without_retry() {
        let (repo, sensor_id) = seeded(1).await;
        let tail = LiveTail::new(repo, fast());
        let cancel = CancellationToken::new();
        let mut sink = FailingSink { attempts: 0 };

        let end = tail.run(&sensor_id, &mut sink, &cancel).await;

        assert_eq!(end, TailEnd::SinkClosed);
        assert_eq!(sink.attempts, 1);
    }

    #[tokio::test]
    async fn test_batch_size_and_interval_are_configurable() {
        let (repo, sensor_id) = seeded(8).await;
        let config = LiveTailConfig {
            interval: Duration::from_millis(100),
            batch_size: 3,
        };
        let tail = LiveTail::new(repo, config);
        let cancel = CancellationToken::new();
        let mut sink = RecordingSink {
            batches: Vec::new(),
            cancel_after: 4,
            cancel: cancel.clone(),
        };

        let started = std::time::Instant::now();
        tail.run(&sensor_id, &mut sink, &cancel).await;

        assert_eq!(sink.batches.len(), 4);
        assert!(sink.batches.iter().all(|b| values(b) == vec![7.0, 6.0, 5.0]));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_tail() {
        let (repo, sensor_id) = seeded(1).await;
        let tail = LiveTail::new(repo, fast());
        let cancel = CancellationToken::new();
        let (mut sink, rx) = latest_channel();
        drop(rx);

        let end = tail.run(&sensor_id, &mut sink, &cancel).await;
        assert_eq!(end, TailEnd::SinkClosed);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_blocked_push() {
        let (repo, sensor_id) = seeded(1).await;
        let tail = LiveTail::new(repo, fast());
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let end = tokio::time::timeout(
            Duration::from_secs(1),
            tail.run(&sensor_id, &mut StuckSink, &cancel),
        )
        .await
        .expect("tail kept running after cancellation");

        assert_eq!(end, TailEnd::Cancelled);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_reader_gets_newest_batch_not_backlog() {
        let (repo, sensor_id) = seeded(1).await;
        let tail = Arc::new(LiveTail::new(repo.clone(), fast()));
        let cancel = CancellationToken::new();

        let mut rx = tail.open(&sensor_id, cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        insert(&repo, &sensor_id, 1.0, at(1)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let batch = rx.recv().await.unwrap();
        assert_eq!(values(&batch), vec![1.0, 0.0]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stream_ends_after_cancellation() {
        let (repo, sensor_id) = seeded(1).await;
        let tail = Arc::new(LiveTail::new(repo, fast()));
        let cancel = CancellationToken::new();

        let mut rx = tail.open(&sensor_id, cancel.clone());
        assert!(rx.recv().await.is_some());
        cancel.cancel();

        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
