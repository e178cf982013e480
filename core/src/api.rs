//! Boundary of the gateway's management API as seen by the dashboard.

use crate::auth::AuthMethod;
use crate::error::GatewayResult;
use crate::gateway::{SessionCredential, SessionSignal};
use crate::logs::LogEntry;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Request/response calls every dashboard component goes through.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Pull endpoint: the gateway's recent log buffer, oldest first.
    async fn fetch_logs(&self, credential: &SessionCredential) -> GatewayResult<Vec<LogEntry>>;

    async fn clear_logs(&self) -> GatewayResult<()>;

    async fn list_accounts(&self) -> GatewayResult<AccountList>;

    async fn usage_summary(&self) -> GatewayResult<UsageSummary>;

    async fn start_auth(&self, name: &str, method: AuthMethod) -> GatewayResult<StartAuthResponse>;

    /// Long-running: resolves once the external sign-in finishes or the gateway gives up.
    async fn complete_auth(&self) -> GatewayResult<CompleteAuthResponse>;

    async fn cancel_auth(&self) -> GatewayResult<()>;

    async fn auth_status(&self) -> GatewayResult<AuthStatus>;

    async fn refresh_all_tokens(&self) -> GatewayResult<RefreshAllResponse>;

    async fn logout(&self) -> GatewayResult<()>;

    /// Session lifecycle signals (invalidation, logout).
    fn subscribe(&self) -> broadcast::Receiver<SessionSignal>;
}

/// Messages of one push-connection; the stream ends or errors when it drops.
pub type FeedMessages = BoxStream<'static, GatewayResult<String>>;

/// Opens push-connections to the live log feed.
#[async_trait]
pub trait LogFeedConnector: Send + Sync {
    async fn open_feed(&self, credential: &SessionCredential) -> GatewayResult<FeedMessages>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub auth_method: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountList {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub active_count: usize,
    #[serde(default)]
    pub total_requests: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub is_active: bool,
}

/// Per-account usage ("credits") as shown on the credits view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    #[serde(default)]
    pub accounts: Vec<UsageRow>,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_accounts: usize,
    #[serde(default)]
    pub active_accounts: usize,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StartAuthRequest<'a> {
    pub name: &'a str,
    pub method: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartAuthResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub verification_uri: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteAuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub account: Option<Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshAllResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub refreshed_count: u32,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub secret_key: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LogListing {
    #[serde(default)]
    pub logs: Vec<Value>,
}

fn default_true() -> bool {
    true
}
