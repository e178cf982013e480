use crate::api::GatewayApi;
use crate::error::GatewayResult;
use crate::gateway::SessionCredential;
use crate::logs::{LogEntry, SharedLogSink};
use crate::task::TaskHandle;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Last-seen timestamp watermark shared by the live stream and the fallback.
///
/// Only ever moves forward.
#[derive(Debug, Clone, Default)]
pub struct FallbackCursor {
    inner: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl FallbackCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.inner.lock()
    }

    /// Moves the watermark to `timestamp` if it is strictly newer.
    /// Returns false for already-seen timestamps.
    pub fn advance(&self, timestamp: DateTime<Utc>) -> bool {
        let mut current = self.inner.lock();
        match *current {
            Some(seen) if timestamp <= seen => false,
            _ => {
                *current = Some(timestamp);
                true
            }
        }
    }
}

/// Fixed-interval pull loop over the log-listing endpoint.
#[derive(Clone)]
pub struct PollingFallback {
    api: Arc<dyn GatewayApi>,
    sink: SharedLogSink,
    cursor: FallbackCursor,
    period: Duration,
    task: Arc<Mutex<Option<TaskHandle>>>,
}

impl PollingFallback {
    pub fn new(
        api: Arc<dyn GatewayApi>,
        sink: SharedLogSink,
        cursor: FallbackCursor,
        period: Duration,
    ) -> Self {
        Self {
            api,
            sink,
            cursor,
            period,
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cursor(&self) -> &FallbackCursor {
        &self.cursor
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Starts polling; a no-op while a loop is already running.
    pub fn start(&self, credential: SessionCredential) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }
        info!(interval_ms = self.period.as_millis() as u64, "log polling fallback started");
        let fallback = self.clone();
        *task = Some(TaskHandle::spawn(async move {
            fallback.run(credential).await;
        }));
    }

    /// Stops polling. Safe to call when not running.
    pub fn stop(&self) {
        if self.task.lock().take().is_some() {
            info!("log polling fallback stopped");
        }
    }

    async fn run(&self, credential: SessionCredential) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.poll_once(&credential).await {
                Ok(appended) if appended > 0 => debug!(appended, "fallback poll appended entries"),
                Ok(_) => {}
                Err(err) if err.ends_session() => {
                    info!("session ended, log polling stops");
                    break;
                }
                Err(err) => warn!(%err, "log poll failed, retrying next tick"),
            }
        }
    }

    /// One pull: fetches recent entries and appends the unseen ones.
    pub async fn poll_once(&self, credential: &SessionCredential) -> GatewayResult<usize> {
        let batch = self.api.fetch_logs(credential).await?;
        Ok(self.ingest(batch))
    }

    /// Appends entries newer than the cursor, advancing it as it goes.
    pub fn ingest(&self, batch: impl IntoIterator<Item = LogEntry>) -> usize {
        let mut appended = 0;
        for entry in batch {
            if self.cursor.advance(entry.timestamp) {
                self.sink.append(entry);
                appended += 1;
            }
        }
        appended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogLevel;
    use crate::testing::{ts, FakeGateway};

    fn batch(seconds: &[i64]) -> Vec<LogEntry> {
        seconds
            .iter()
            .map(|s| LogEntry::new(ts(*s), LogLevel::Info, format!("t={s}")))
            .collect()
    }

    fn messages(sink: &SharedLogSink) -> Vec<String> {
        sink.visible_snapshot().into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let cursor = FallbackCursor::new();
        assert!(cursor.advance(ts(20)));
        assert!(!cursor.advance(ts(20)));
        assert!(!cursor.advance(ts(15)));
        assert_eq!(cursor.get(), Some(ts(20)));
    }

    #[test]
    fn duplicates_and_stragglers_are_dropped_across_ticks() {
        let api = FakeGateway::new();
        let sink = SharedLogSink::default();
        let fallback = PollingFallback::new(api, sink.clone(), FallbackCursor::new(), DEFAULT_POLL_INTERVAL);

        assert_eq!(fallback.ingest(batch(&[10, 10, 20])), 2);
        assert_eq!(fallback.ingest(batch(&[15, 30])), 1);

        assert_eq!(messages(&sink), ["t=10", "t=20", "t=30"]);
        assert_eq!(fallback.cursor().get(), Some(ts(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_interval_and_survives_fetch_failures() {
        let api = FakeGateway::new();
        api.push_log_batch(Ok(batch(&[10, 10, 20])));
        api.push_log_batch(Err(crate::error::GatewayError::Status {
            status: 503,
            detail: "busy".into(),
        }));
        api.push_log_batch(Ok(batch(&[10, 10, 20, 15, 30])));
        let sink = SharedLogSink::default();
        let fallback = PollingFallback::new(api.clone(), sink.clone(), FallbackCursor::new(), DEFAULT_POLL_INTERVAL);

        fallback.start(SessionCredential::new("tok"));
        fallback.start(SessionCredential::new("tok"));
        assert!(fallback.is_running());

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(api.log_fetches(), 0, "first tick fires one interval after start");

        tokio::time::sleep(Duration::from_millis(4_200)).await;
        assert_eq!(api.log_fetches(), 3);
        assert_eq!(messages(&sink), ["t=10", "t=20", "t=30"]);
        assert_eq!(fallback.cursor().get(), Some(ts(30)));

        fallback.stop();
        fallback.stop();
        assert!(!fallback.is_running());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.log_fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn session_loss_ends_the_loop() {
        let api = FakeGateway::new();
        api.push_log_batch(Err(crate::error::GatewayError::SessionInvalid));
        let fallback = PollingFallback::new(api.clone(), SharedLogSink::default(), FallbackCursor::new(), DEFAULT_POLL_INTERVAL);
        fallback.start(SessionCredential::new("tok"));
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(api.log_fetches(), 1);
        assert!(!fallback.is_running());
    }
}
