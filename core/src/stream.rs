use crate::api::LogFeedConnector;
use crate::error::GatewayError;
use crate::fallback::{FallbackCursor, PollingFallback};
use crate::gateway::SessionCredential;
use crate::logs::{LogEntry, SharedLogSink};
use crate::task::TaskHandle;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    PollingFallback,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::PollingFallback => "polling",
        }
    }
}

/// How the live stream retries before handing over to polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// Event reported by a connection's reader task, tagged with its generation.
#[derive(Debug)]
enum FeedEvent {
    Opened,
    Message(String),
    Failed(String),
    SessionEnded,
}

struct StreamShared {
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    /// Bumped by every disconnect; a dispatcher from an older epoch is stale.
    epoch: AtomicU64,
}

impl StreamShared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = current.label(), to = state.label(), "log stream state");
            *current = state;
            true
        });
    }
}

/// Push-connection to the gateway's log feed with reconnect and polling fallback.
///
/// Each connection gets a reader task that forwards feed events onto a channel;
/// a single dispatch loop consumes them, so sink writes, counters and state
/// changes happen in arrival order on one task.
#[derive(Clone)]
pub struct LiveLogStream {
    connector: Arc<dyn LogFeedConnector>,
    sink: SharedLogSink,
    fallback: PollingFallback,
    policy: ReconnectPolicy,
    shared: Arc<StreamShared>,
    dispatch: Arc<Mutex<Option<TaskHandle>>>,
}

impl LiveLogStream {
    pub fn new(
        connector: Arc<dyn LogFeedConnector>,
        sink: SharedLogSink,
        fallback: PollingFallback,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            sink,
            fallback,
            policy,
            shared: Arc::new(StreamShared {
                state,
                attempts: AtomicU32::new(0),
                epoch: AtomicU64::new(0),
            }),
            dispatch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn fallback(&self) -> &PollingFallback {
        &self.fallback
    }

    pub fn cursor(&self) -> &FallbackCursor {
        self.fallback.cursor()
    }

    /// Opens the push-connection, replacing any previous one and resetting
    /// the attempt budget.
    pub fn connect(&self, credential: SessionCredential) {
        self.disconnect();
        self.shared.set_state(ConnectionState::Connecting);
        info!("connecting to live log feed");
        let mut dispatch = self.dispatch.lock();
        let dispatcher = self.dispatcher(self.shared.epoch.load(Ordering::SeqCst));
        *dispatch = Some(TaskHandle::spawn(dispatcher.run(credential)));
    }

    /// Tears down the connection and any fallback polling. Idempotent.
    pub fn disconnect(&self) {
        let mut dispatch = self.dispatch.lock();
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let was_active = dispatch.take().is_some();
        self.fallback.stop();
        drop(dispatch);
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Disconnected);
        if was_active {
            info!("live log feed disconnected");
        }
    }

    fn dispatcher(&self, epoch: u64) -> Dispatcher {
        Dispatcher {
            connector: self.connector.clone(),
            sink: self.sink.clone(),
            fallback: self.fallback.clone(),
            policy: self.policy,
            shared: self.shared.clone(),
            dispatch: self.dispatch.clone(),
            epoch,
        }
    }
}

struct Dispatcher {
    connector: Arc<dyn LogFeedConnector>,
    sink: SharedLogSink,
    fallback: PollingFallback,
    policy: ReconnectPolicy,
    shared: Arc<StreamShared>,
    dispatch: Arc<Mutex<Option<TaskHandle>>>,
    epoch: u64,
}

impl Dispatcher {
    async fn run(self, credential: SessionCredential) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut generation = 0u64;
        let mut reader = self.spawn_reader(&credential, generation, tx.clone());

        while let Some((from, event)) = rx.recv().await {
            if from != generation {
                continue;
            }
            match event {
                FeedEvent::Opened => {
                    info!("live log feed connected");
                    self.shared.set_state(ConnectionState::Connected);
                }
                FeedEvent::Message(payload) => self.deliver(&payload),
                FeedEvent::SessionEnded => {
                    drop(reader);
                    self.shared.set_state(ConnectionState::Disconnected);
                    return;
                }
                FeedEvent::Failed(reason) => {
                    drop(reader);
                    let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(attempt, max = self.policy.max_attempts, %reason, "live log feed failed");
                    if attempt >= self.policy.max_attempts {
                        self.hand_over_to_polling(credential);
                        return;
                    }
                    self.shared.set_state(ConnectionState::Disconnected);
                    info!(attempt, delay_ms = self.policy.delay.as_millis() as u64, "scheduling log feed reconnect");
                    tokio::time::sleep(self.policy.delay).await;
                    generation += 1;
                    self.shared.set_state(ConnectionState::Connecting);
                    reader = self.spawn_reader(&credential, generation, tx.clone());
                }
            }
        }
    }

    /// Starts polling unless the stream was disconnected since this
    /// dispatcher was spawned. Holds the dispatch lock so a concurrent
    /// `disconnect` either sees the poll loop or prevents it.
    fn hand_over_to_polling(&self, credential: SessionCredential) {
        let _dispatch = self.dispatch.lock();
        if self.shared.epoch.load(Ordering::SeqCst) != self.epoch {
            debug!("log stream disconnected before polling handover");
            return;
        }
        warn!("live log feed retry budget exhausted, switching to polling");
        self.shared.set_state(ConnectionState::PollingFallback);
        self.fallback.start(credential);
    }

    fn deliver(&self, payload: &str) {
        self.shared.attempts.store(0, Ordering::SeqCst);
        let entry = match LogEntry::parse(payload) {
            Some(entry) => {
                // The gateway replays its buffer on every connect.
                if !self.fallback.cursor().advance(entry.timestamp) {
                    debug!(timestamp = %entry.timestamp, "skipping replayed log entry");
                    return;
                }
                entry
            }
            None => {
                debug!(len = payload.len(), "unstructured log feed message");
                LogEntry::raw(payload)
            }
        };
        self.sink.append(entry);
    }

    fn spawn_reader(
        &self,
        credential: &SessionCredential,
        generation: u64,
        tx: mpsc::UnboundedSender<(u64, FeedEvent)>,
    ) -> TaskHandle {
        let connector = self.connector.clone();
        let credential = credential.clone();
        TaskHandle::spawn(async move {
            let mut feed = match connector.open_feed(&credential).await {
                Ok(feed) => feed,
                Err(err) => {
                    let _ = tx.send((generation, failure(err)));
                    return;
                }
            };
            if tx.send((generation, FeedEvent::Opened)).is_err() {
                return;
            }
            while let Some(item) = feed.next().await {
                let event = match item {
                    Ok(payload) => FeedEvent::Message(payload),
                    Err(err) => {
                        let _ = tx.send((generation, failure(err)));
                        return;
                    }
                };
                if tx.send((generation, event)).is_err() {
                    return;
                }
            }
            let _ = tx.send((generation, FeedEvent::Failed("feed closed by gateway".to_string())));
        })
    }
}

fn failure(err: GatewayError) -> FeedEvent {
    if err.ends_session() {
        FeedEvent::SessionEnded
    } else {
        FeedEvent::Failed(err.to_string())
    }
}
