//! Periodic background refreshes bound to the dashboard session.

use crate::api::{AccountList, GatewayApi, UsageSummary};
use crate::config::RefreshSettings;
use crate::error::GatewayResult;
use crate::task::TaskHandle;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefreshTask {
    Accounts,
    Credits,
    TokenRenewal,
}

impl RefreshTask {
    pub const ALL: [RefreshTask; 3] = [Self::Accounts, Self::Credits, Self::TokenRenewal];

    pub fn name(self) -> &'static str {
        match self {
            Self::Accounts => "accounts-refresh",
            Self::Credits => "credits-refresh",
            Self::TokenRenewal => "token-renewal",
        }
    }
}

impl fmt::Display for RefreshTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveView {
    #[default]
    Accounts,
    Credits,
    Logs,
    Settings,
}

/// Which view the operator is looking at; read by guarded refresh tasks.
#[derive(Debug, Clone, Default)]
pub struct ViewTracker {
    current: Arc<RwLock<ActiveView>>,
}

impl ViewTracker {
    pub fn new(initial: ActiveView) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn current(&self) -> ActiveView {
        *self.current.read()
    }

    pub fn show(&self, view: ActiveView) {
        *self.current.write() = view;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub accounts: Option<AccountList>,
    pub usage: Option<UsageSummary>,
    pub last_renewal: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Latest results of the refresh tasks, shared with the view layer.
#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    inner: Arc<RwLock<DashboardSnapshot>>,
}

impl DashboardData {
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.inner.read().clone()
    }

    pub fn accounts(&self) -> Option<AccountList> {
        self.inner.read().accounts.clone()
    }

    pub fn usage(&self) -> Option<UsageSummary> {
        self.inner.read().usage.clone()
    }

    pub fn last_renewal(&self) -> Option<u32> {
        self.inner.read().last_renewal
    }

    fn update(&self, apply: impl FnOnce(&mut DashboardSnapshot)) {
        let mut snapshot = self.inner.write();
        apply(&mut snapshot);
        snapshot.updated_at = Some(Utc::now());
    }

    pub fn clear(&self) {
        *self.inner.write() = DashboardSnapshot::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Accounts { count: usize },
    Credits { rows: usize },
    /// The guard did not hold; nothing was fetched.
    Skipped,
    Renewed { count: u32 },
}

#[derive(Clone)]
struct RefreshContext {
    api: Arc<dyn GatewayApi>,
    data: DashboardData,
    views: ViewTracker,
}

impl RefreshContext {
    async fn run(&self, task: RefreshTask) -> GatewayResult<RefreshOutcome> {
        match task {
            RefreshTask::Accounts => {
                let list = self.api.list_accounts().await?;
                let count = list.accounts.len();
                self.data.update(|snapshot| snapshot.accounts = Some(list));
                Ok(RefreshOutcome::Accounts { count })
            }
            RefreshTask::Credits => {
                if self.views.current() != ActiveView::Credits {
                    return Ok(RefreshOutcome::Skipped);
                }
                let usage = self.api.usage_summary().await?;
                let rows = usage.accounts.len();
                self.data.update(|snapshot| snapshot.usage = Some(usage));
                Ok(RefreshOutcome::Credits { rows })
            }
            RefreshTask::TokenRenewal => {
                let response = self.api.refresh_all_tokens().await?;
                let count = response.refreshed_count;
                info!(refreshed = count, "renewed account tokens");
                self.data.update(|snapshot| snapshot.last_renewal = Some(count));
                Ok(RefreshOutcome::Renewed { count })
            }
        }
    }
}

/// Supervises one timer per [`RefreshTask`].
pub struct RefreshScheduler {
    ctx: RefreshContext,
    intervals: RefreshSettings,
    timers: Mutex<HashMap<RefreshTask, TaskHandle>>,
}

impl RefreshScheduler {
    pub fn new(
        api: Arc<dyn GatewayApi>,
        data: DashboardData,
        views: ViewTracker,
        intervals: RefreshSettings,
    ) -> Self {
        Self {
            ctx: RefreshContext { api, data, views },
            intervals,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn data(&self) -> &DashboardData {
        &self.ctx.data
    }

    pub fn views(&self) -> &ViewTracker {
        &self.ctx.views
    }

    /// Starts `task`'s timer. Returns false if one is already live.
    pub fn start(&self, task: RefreshTask) -> bool {
        let mut timers = self.timers.lock();
        if timers.get(&task).is_some_and(|timer| !timer.is_finished()) {
            return false;
        }
        let period = self.intervals.interval(task);
        let ctx = self.ctx.clone();
        debug!(task = %task, period_secs = period.as_secs(), "refresh timer started");
        timers.insert(
            task,
            TaskHandle::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    match ctx.run(task).await {
                        Ok(outcome) => debug!(task = %task, ?outcome, "refresh finished"),
                        Err(err) if err.ends_session() => {
                            info!(task = %task, "session ended, refresh timer stops");
                            break;
                        }
                        Err(err) => warn!(task = %task, %err, "refresh failed"),
                    }
                }
            }),
        );
        true
    }

    pub fn stop(&self, task: RefreshTask) -> bool {
        let stopped = self.timers.lock().remove(&task).is_some();
        if stopped {
            debug!(task = %task, "refresh timer stopped");
        }
        stopped
    }

    pub fn start_all(&self) {
        for task in RefreshTask::ALL {
            self.start(task);
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<_> = self.timers.lock().drain().collect();
        if !drained.is_empty() {
            info!(stopped = drained.len(), "refresh timers stopped");
        }
    }

    pub fn is_running(&self, task: RefreshTask) -> bool {
        self.timers
            .lock()
            .get(&task)
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Tasks with a live timer, in declaration order.
    pub fn running(&self) -> Vec<RefreshTask> {
        let timers = self.timers.lock();
        let mut live: Vec<_> = timers
            .iter()
            .filter(|(_, timer)| !timer.is_finished())
            .map(|(task, _)| *task)
            .collect();
        live.sort();
        live
    }

    /// Runs `task` once, outside its timer.
    pub async fn refresh_now(&self, task: RefreshTask) -> GatewayResult<RefreshOutcome> {
        self.ctx.run(task).await
    }
}
