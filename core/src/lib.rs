pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod logs;
pub mod scheduler;
pub mod session;
mod sse;
pub mod store;
pub mod stream;
mod task;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{GatewayApi, LogFeedConnector};
pub use auth::{AuthLinkError, AuthLinkWorkflow, AuthMethod, AuthSession, AuthWorkflowState};
pub use config::{ConfigError, DashboardConfig};
pub use error::{GatewayError, GatewayResult};
pub use fallback::{FallbackCursor, PollingFallback};
pub use gateway::{SessionCredential, SessionGateway, SessionSignal};
pub use logs::{LogEntry, LogFilter, LogLevel, LogSink, SharedLogSink};
pub use scheduler::{ActiveView, DashboardData, RefreshScheduler, RefreshTask};
pub use session::{DashboardSession, SessionEnd};
pub use store::TranscriptStore;
pub use stream::{ConnectionState, LiveLogStream, ReconnectPolicy};
