//! In-process fakes for the gateway boundary, shared by unit and integration tests.

use crate::api::{
    Account, AccountList, AuthStatus, CompleteAuthResponse, FeedMessages, GatewayApi,
    LogFeedConnector, RefreshAllResponse, StartAuthResponse, UsageSummary,
};
use crate::auth::AuthMethod;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{SessionCredential, SessionSignal};
use crate::logs::LogEntry;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

/// Fixed timestamp `secs` seconds after an arbitrary epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_740_000_000 + secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn account(id: i64, name: &str) -> Account {
    Account {
        id,
        name: name.to_string(),
        auth_method: Some("social".into()),
        provider: Some("Github".into()),
        region: None,
        expires_at: None,
        is_active: true,
        request_count: 0,
        status: "healthy".into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    FetchLogs,
    ClearLogs,
    ListAccounts,
    UsageSummary,
    StartAuth,
    CompleteAuth,
    CancelAuth,
    AuthStatus,
    RefreshAll,
    Logout,
}

type Completion = oneshot::Receiver<GatewayResult<CompleteAuthResponse>>;

#[derive(Default)]
struct Script {
    calls: HashMap<Call, usize>,
    failures: HashMap<Call, VecDeque<GatewayError>>,
    log_batches: VecDeque<GatewayResult<Vec<LogEntry>>>,
    start_responses: VecDeque<GatewayResult<StartAuthResponse>>,
    completions: VecDeque<Completion>,
    started_with: Vec<(String, AuthMethod)>,
    accounts: AccountList,
    usage: UsageSummary,
    fail_cancel: bool,
}

/// Scripted [`GatewayApi`] that counts every call.
pub struct FakeGateway {
    script: Mutex<Script>,
    signals: broadcast::Sender<SessionSignal>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let (signals, _) = broadcast::channel(16);
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            signals,
        })
    }

    pub fn calls(&self, call: Call) -> usize {
        self.script.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn log_fetches(&self) -> usize {
        self.calls(Call::FetchLogs)
    }

    pub fn completion_calls(&self) -> usize {
        self.calls(Call::CompleteAuth)
    }

    pub fn cancel_calls(&self) -> usize {
        self.calls(Call::CancelAuth)
    }

    /// Queues the result of the next log fetch; an empty queue yields no entries.
    pub fn push_log_batch(&self, batch: GatewayResult<Vec<LogEntry>>) {
        self.script.lock().log_batches.push_back(batch);
    }

    /// Makes the next `call` fail with `err`.
    pub fn fail_next(&self, call: Call, err: GatewayError) {
        self.script
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(err);
    }

    /// Queues the next start-auth result. Without one, starts succeed with a social login URL.
    pub fn set_start_response(&self, response: GatewayResult<StartAuthResponse>) {
        self.script.lock().start_responses.push_back(response);
    }

    /// Parks the next complete-auth call until the returned sender resolves it.
    /// Unparked calls never resolve.
    pub fn hold_completion(&self) -> oneshot::Sender<GatewayResult<CompleteAuthResponse>> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().completions.push_back(rx);
        tx
    }

    pub fn fail_cancel(&self) {
        self.script.lock().fail_cancel = true;
    }

    pub fn started_with(&self) -> Vec<(String, AuthMethod)> {
        self.script.lock().started_with.clone()
    }

    pub fn set_accounts(&self, accounts: Vec<Account>) {
        let mut script = self.script.lock();
        script.accounts = AccountList {
            total_count: accounts.len(),
            active_count: accounts.iter().filter(|a| a.is_active).count(),
            total_requests: accounts.iter().map(|a| a.request_count).sum(),
            accounts,
        };
    }

    pub fn set_usage(&self, usage: UsageSummary) {
        self.script.lock().usage = usage;
    }

    /// Emits the same signal the real gateway emits on a 401.
    pub fn invalidate(&self) {
        let _ = self.signals.send(SessionSignal::Invalidated);
    }

    fn record(&self, call: Call) -> GatewayResult<()> {
        let mut script = self.script.lock();
        *script.calls.entry(call).or_insert(0) += 1;
        match script.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => {
                if err.is_session_invalid() {
                    let _ = self.signals.send(SessionSignal::Invalidated);
                }
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn fetch_logs(&self, _credential: &SessionCredential) -> GatewayResult<Vec<LogEntry>> {
        self.record(Call::FetchLogs)?;
        self.script
            .lock()
            .log_batches
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn clear_logs(&self) -> GatewayResult<()> {
        self.record(Call::ClearLogs)
    }

    async fn list_accounts(&self) -> GatewayResult<AccountList> {
        self.record(Call::ListAccounts)?;
        Ok(self.script.lock().accounts.clone())
    }

    async fn usage_summary(&self) -> GatewayResult<UsageSummary> {
        self.record(Call::UsageSummary)?;
        Ok(self.script.lock().usage.clone())
    }

    async fn start_auth(&self, name: &str, method: AuthMethod) -> GatewayResult<StartAuthResponse> {
        self.record(Call::StartAuth)?;
        let mut script = self.script.lock();
        script.started_with.push((name.to_string(), method));
        script.start_responses.pop_front().unwrap_or_else(|| {
            Ok(StartAuthResponse {
                success: true,
                auth_url: Some("https://auth.example/login".into()),
                method: Some("social".into()),
                ..Default::default()
            })
        })
    }

    async fn complete_auth(&self) -> GatewayResult<CompleteAuthResponse> {
        self.record(Call::CompleteAuth)?;
        let parked = self.script.lock().completions.pop_front();
        match parked {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(GatewayError::Rejected("completion abandoned".into()))),
            None => std::future::pending().await,
        }
    }

    async fn cancel_auth(&self) -> GatewayResult<()> {
        self.record(Call::CancelAuth)?;
        if self.script.lock().fail_cancel {
            return Err(GatewayError::Status {
                status: 502,
                detail: "cancel not delivered".into(),
            });
        }
        Ok(())
    }

    async fn auth_status(&self) -> GatewayResult<AuthStatus> {
        self.record(Call::AuthStatus)?;
        Ok(AuthStatus::default())
    }

    async fn refresh_all_tokens(&self) -> GatewayResult<RefreshAllResponse> {
        self.record(Call::RefreshAll)?;
        let refreshed_count = self.script.lock().accounts.accounts.len() as u32;
        Ok(RefreshAllResponse {
            success: true,
            refreshed_count,
            message: None,
        })
    }

    async fn logout(&self) -> GatewayResult<()> {
        self.record(Call::Logout)?;
        let _ = self.signals.send(SessionSignal::LoggedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }
}

enum FeedMode {
    Failing,
    Scripted(VecDeque<Vec<String>>),
    RejectingSession,
}

/// Scripted [`LogFeedConnector`].
pub struct FakeFeed {
    mode: Mutex<FeedMode>,
    opens: AtomicUsize,
}

impl FakeFeed {
    fn with_mode(mode: FeedMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            opens: AtomicUsize::new(0),
        })
    }

    /// Every open fails.
    pub fn failing() -> Arc<Self> {
        Self::with_mode(FeedMode::Failing)
    }

    /// Each open consumes one connection: its messages are delivered, then it
    /// drops. Opens past the script fail.
    pub fn scripted(connections: Vec<Vec<String>>) -> Arc<Self> {
        Self::with_mode(FeedMode::Scripted(connections.into()))
    }

    /// Every open is refused because the session is no longer valid.
    pub fn rejecting_session() -> Arc<Self> {
        Self::with_mode(FeedMode::RejectingSession)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogFeedConnector for FakeFeed {
    async fn open_feed(&self, _credential: &SessionCredential) -> GatewayResult<FeedMessages> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let unavailable = || GatewayError::Status {
            status: 503,
            detail: "feed unavailable".into(),
        };
        match &mut *self.mode.lock() {
            FeedMode::Failing => Err(unavailable()),
            FeedMode::RejectingSession => Err(GatewayError::SessionInvalid),
            FeedMode::Scripted(connections) => match connections.pop_front() {
                Some(messages) => Ok(futures::stream::iter(messages.into_iter().map(Ok)).boxed()),
                None => Err(unavailable()),
            },
        }
    }
}
