//! Session-scoped context: everything that lives between login and logout.

use crate::api::{GatewayApi, LogFeedConnector};
use crate::auth::{AuthLinkWorkflow, AuthWorkflowState};
use crate::config::DashboardConfig;
use crate::error::GatewayResult;
use crate::fallback::{FallbackCursor, PollingFallback};
use crate::gateway::{SessionCredential, SessionGateway, SessionSignal};
use crate::logs::SharedLogSink;
use crate::scheduler::{DashboardData, RefreshScheduler, ViewTracker};
use crate::stream::LiveLogStream;
use crate::task::TaskHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The gateway rejected the credential.
    Invalidated,
    /// Logged out from elsewhere through the same gateway.
    LoggedOut,
    Shutdown,
}

struct SessionInner {
    api: Arc<dyn GatewayApi>,
    credential: SessionCredential,
    sink: SharedLogSink,
    stream: LiveLogStream,
    scheduler: RefreshScheduler,
    auth: AuthLinkWorkflow,
    closed: AtomicBool,
    ended: watch::Sender<Option<SessionEnd>>,
    watcher: Mutex<Option<TaskHandle>>,
}

impl SessionInner {
    /// Stops all scheduled work. Returns false if the session was already torn down.
    fn teardown(&self, reason: SessionEnd) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(?reason, "tearing down dashboard session");
        self.stream.disconnect();
        self.scheduler.stop_all();
        if self.auth.state() == AuthWorkflowState::AwaitingCompletion {
            debug!("abandoning in-flight account link");
        }
        self.auth.reset();
        self.scheduler.data().clear();
        self.ended.send_replace(Some(reason));
        true
    }
}

/// Owns the gateway-facing components for one authenticated session.
#[derive(Clone)]
pub struct DashboardSession {
    inner: Arc<SessionInner>,
}

impl DashboardSession {
    /// Logs in with `secret_key` and assembles a session over the HTTP gateway.
    /// Background work begins with [`DashboardSession::start`]; one-shot
    /// callers never start it.
    pub async fn establish(config: &DashboardConfig, secret_key: &str) -> GatewayResult<Self> {
        let gateway = Arc::new(SessionGateway::from_config(config)?);
        let credential = gateway.login(secret_key).await?;
        info!(base_url = %gateway.base_url(), "dashboard session established");
        Ok(Self::assemble(gateway.clone(), gateway, credential, config))
    }

    /// Builds a session over arbitrary gateway seams. Must run inside a tokio runtime.
    pub fn assemble(
        api: Arc<dyn GatewayApi>,
        feed: Arc<dyn LogFeedConnector>,
        credential: SessionCredential,
        config: &DashboardConfig,
    ) -> Self {
        let sink = SharedLogSink::with_capacity(config.logs.capacity);
        let fallback = PollingFallback::new(
            api.clone(),
            sink.clone(),
            FallbackCursor::new(),
            config.logs.poll_interval,
        );
        let stream = LiveLogStream::new(
            feed,
            sink.clone(),
            fallback,
            config.logs.reconnect_policy(),
        );
        let scheduler = RefreshScheduler::new(
            api.clone(),
            DashboardData::default(),
            ViewTracker::default(),
            config.refresh,
        );
        let auth = AuthLinkWorkflow::new(api.clone());
        let (ended, _) = watch::channel(None);
        let signals = api.subscribe();
        let inner = Arc::new(SessionInner {
            api,
            credential,
            sink,
            stream,
            scheduler,
            auth,
            closed: AtomicBool::new(false),
            ended,
            watcher: Mutex::new(None),
        });
        let watcher = TaskHandle::spawn(watch_signals(Arc::downgrade(&inner), signals));
        *inner.watcher.lock() = Some(watcher);
        Self { inner }
    }

    /// Starts the refresh timers and the live log feed.
    pub fn start(&self) {
        if !self.is_active() {
            return;
        }
        self.inner.scheduler.start_all();
        self.inner.stream.connect(self.inner.credential.clone());
    }

    /// Tears the session down and logs out of the gateway. Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.teardown(SessionEnd::Shutdown) {
            return;
        }
        drop(self.inner.watcher.lock().take());
        if let Err(err) = self.inner.api.logout().await {
            warn!(%err, "gateway logout failed");
        }
    }

    /// Loads the pull endpoint into the sink once, through the shared cursor.
    pub async fn backfill(&self) -> GatewayResult<usize> {
        let appended = self
            .inner
            .stream
            .fallback()
            .poll_once(&self.inner.credential)
            .await?;
        debug!(appended, "log backfill finished");
        Ok(appended)
    }

    /// Clears the gateway's log buffer, then the local sink.
    pub async fn clear_logs(&self) -> GatewayResult<()> {
        self.inner.api.clear_logs().await?;
        self.inner.sink.clear();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Option<SessionEnd> {
        *self.inner.ended.borrow()
    }

    /// Resolves once the session has been torn down, for whatever reason.
    pub async fn wait_ended(&self) -> SessionEnd {
        let mut ended = self.inner.ended.subscribe();
        let reason = match ended.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        reason.unwrap_or(SessionEnd::Shutdown)
    }

    pub fn credential(&self) -> &SessionCredential {
        &self.inner.credential
    }

    pub fn api(&self) -> &Arc<dyn GatewayApi> {
        &self.inner.api
    }

    pub fn sink(&self) -> &SharedLogSink {
        &self.inner.sink
    }

    pub fn stream(&self) -> &LiveLogStream {
        &self.inner.stream
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.inner.scheduler
    }

    pub fn auth(&self) -> &AuthLinkWorkflow {
        &self.inner.auth
    }

    pub fn views(&self) -> &ViewTracker {
        self.inner.scheduler.views()
    }

    pub fn data(&self) -> &DashboardData {
        self.inner.scheduler.data()
    }
}

async fn watch_signals(session: Weak<SessionInner>, mut signals: broadcast::Receiver<SessionSignal>) {
    loop {
        let reason = match signals.recv().await {
            Ok(SessionSignal::Invalidated) => SessionEnd::Invalidated,
            Ok(SessionSignal::LoggedOut) => SessionEnd::LoggedOut,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "session signal watcher lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if let Some(inner) = session.upgrade() {
            if reason == SessionEnd::Invalidated {
                warn!("session credential rejected by the gateway");
            }
            inner.teardown(reason);
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RefreshTask;
    use crate::stream::ConnectionState;
    use crate::testing::{Call, FakeFeed, FakeGateway};
    use std::time::Duration;

    fn session(api: Arc<FakeGateway>, feed: Arc<FakeFeed>) -> DashboardSession {
        DashboardSession::assemble(
            api,
            feed,
            SessionCredential::new("tok"),
            &DashboardConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_timers_and_feed() {
        let api = FakeGateway::new();
        let feed = FakeFeed::failing();
        let session = session(api.clone(), feed.clone());
        session.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.scheduler().running(), RefreshTask::ALL.to_vec());
        assert_eq!(feed.opens(), 1);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent_and_logs_out_once() {
        let api = FakeGateway::new();
        let session = session(api.clone(), FakeFeed::failing());
        session.start();
        session.shutdown().await;
        session.shutdown().await;
        assert_eq!(api.calls(Call::Logout), 1);
        assert!(!session.is_active());
        assert_eq!(session.ended(), Some(SessionEnd::Shutdown));
        assert_eq!(session.stream().state(), ConnectionState::Disconnected);
        assert!(session.scheduler().running().is_empty());

        // A closed session does not restart.
        session.start();
        assert!(session.scheduler().running().is_empty());
    }
}
