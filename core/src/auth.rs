use crate::api::{Account, AuthStatus, CompleteAuthResponse, GatewayApi, StartAuthResponse};
use crate::error::{GatewayError, GatewayResult};
use crate::task::TaskHandle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// External sign-in providers the gateway can link accounts through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "github")]
    Github,
    #[serde(rename = "builder-id")]
    BuilderId,
}

impl AuthMethod {
    pub const ALL: [AuthMethod; 3] = [Self::Google, Self::Github, Self::BuilderId];

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
            Self::BuilderId => "builder-id",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Github => "GitHub",
            Self::BuilderId => "AWS Builder ID",
        }
    }

    /// Device-code flows hand the operator a code to type in; social flows do not.
    pub fn uses_device_code(self) -> bool {
        match self {
            Self::Google | Self::Github => false,
            Self::BuilderId => true,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown auth method `{0}` (expected google, github or builder-id)")]
pub struct UnknownAuthMethod(pub String);

impl FromStr for AuthMethod {
    type Err = UnknownAuthMethod;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::Github),
            "builder-id" | "builder_id" | "builderid" => Ok(Self::BuilderId),
            _ => Err(UnknownAuthMethod(value.to_string())),
        }
    }
}

/// What the operator needs to finish the external sign-in step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub method: AuthMethod,
    pub provider_label: String,
    pub external_url: String,
    pub device_code: Option<String>,
    pub verification_uri: Option<String>,
    pub expires_in: Option<u64>,
    pub account_label: String,
}

impl AuthSession {
    fn from_response(
        method: AuthMethod,
        account_label: &str,
        response: StartAuthResponse,
    ) -> Result<Self, String> {
        if !response.success {
            return Err(response
                .message
                .unwrap_or_else(|| "gateway refused to start authentication".to_string()));
        }
        let external_url = response
            .auth_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| "gateway did not return a sign-in url".to_string())?;
        let device_code = if method.uses_device_code() {
            let code = response
                .user_code
                .filter(|code| !code.trim().is_empty())
                .ok_or_else(|| "gateway did not return a device code".to_string())?;
            Some(code)
        } else {
            None
        };
        Ok(Self {
            method,
            provider_label: method.label().to_string(),
            external_url,
            device_code,
            verification_uri: response.verification_uri,
            expires_in: response.expires_in,
            account_label: account_label.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthWorkflowState {
    Idle,
    Initializing,
    AwaitingCompletion,
    Succeeded { account: Account },
    Failed { message: String },
    Cancelled,
}

impl AuthWorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingCompletion => "awaiting-completion",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    fn accepts_start(&self) -> bool {
        matches!(self, Self::Idle) || self.is_terminal()
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthLinkError {
    #[error("account name must not be blank")]
    BlankLabel,
    #[error("an account link is already {state}")]
    InProgress { state: &'static str },
    #[error("nothing to cancel while {state}")]
    NotAwaiting { state: &'static str },
    #[error("account link failed: {message}")]
    Failed { message: String },
}

struct Flight {
    state: AuthWorkflowState,
    session: Option<AuthSession>,
    /// Bumped on every start and reset; resolutions from older flights are stale.
    id: u64,
    completion: Option<TaskHandle>,
}

struct Shared {
    flight: Mutex<Flight>,
    states: watch::Sender<AuthWorkflowState>,
}

impl Shared {
    fn transition(&self, flight: &mut Flight, next: AuthWorkflowState) {
        debug!(from = flight.state.name(), to = next.name(), "auth workflow transition");
        if next.is_terminal() {
            flight.session = None;
        }
        flight.state = next.clone();
        self.states.send_replace(next);
    }
}

/// Single-flight orchestration of start → external hand-off → completion.
#[derive(Clone)]
pub struct AuthLinkWorkflow {
    api: Arc<dyn GatewayApi>,
    shared: Arc<Shared>,
}

impl AuthLinkWorkflow {
    pub fn new(api: Arc<dyn GatewayApi>) -> Self {
        let (states, _) = watch::channel(AuthWorkflowState::Idle);
        Self {
            api,
            shared: Arc::new(Shared {
                flight: Mutex::new(Flight {
                    state: AuthWorkflowState::Idle,
                    session: None,
                    id: 0,
                    completion: None,
                }),
                states,
            }),
        }
    }

    pub fn state(&self) -> AuthWorkflowState {
        self.shared.flight.lock().state.clone()
    }

    /// The session awaiting completion, if any.
    pub fn session(&self) -> Option<AuthSession> {
        self.shared.flight.lock().session.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthWorkflowState> {
        self.shared.states.subscribe()
    }

    /// Starts linking `account_label` through `method`.
    ///
    /// On success the workflow is awaiting completion and the returned session
    /// holds the URL (and device code) to present to the operator; completion
    /// is awaited in the background.
    pub async fn start(
        &self,
        method: AuthMethod,
        account_label: &str,
    ) -> Result<AuthSession, AuthLinkError> {
        let label = account_label.trim();
        if label.is_empty() {
            return Err(AuthLinkError::BlankLabel);
        }
        let flight_id = {
            let mut flight = self.shared.flight.lock();
            if !flight.state.accepts_start() {
                return Err(AuthLinkError::InProgress {
                    state: flight.state.name(),
                });
            }
            flight.id += 1;
            flight.completion = None;
            self.shared.transition(&mut flight, AuthWorkflowState::Initializing);
            flight.id
        };
        info!(method = %method, account = label, "starting account link");

        let started = self
            .api
            .start_auth(label, method)
            .await
            .map_err(|err| err.to_string())
            .and_then(|response| AuthSession::from_response(method, label, response));

        let mut flight = self.shared.flight.lock();
        if flight.id != flight_id {
            return Err(AuthLinkError::Failed {
                message: "account link was reset".to_string(),
            });
        }
        match started {
            Err(message) => {
                warn!(%message, "account link could not start");
                self.shared.transition(
                    &mut flight,
                    AuthWorkflowState::Failed {
                        message: message.clone(),
                    },
                );
                Err(AuthLinkError::Failed { message })
            }
            Ok(session) => {
                flight.session = Some(session.clone());
                self.shared
                    .transition(&mut flight, AuthWorkflowState::AwaitingCompletion);
                flight.completion = Some(self.spawn_completion(flight_id));
                Ok(session)
            }
        }
    }

    fn spawn_completion(&self, flight_id: u64) -> TaskHandle {
        let api = self.api.clone();
        let shared = self.shared.clone();
        TaskHandle::spawn(async move {
            let resolution = api.complete_auth().await;
            let next = resolve(resolution);
            let mut flight = shared.flight.lock();
            if flight.id != flight_id || flight.state != AuthWorkflowState::AwaitingCompletion {
                debug!(resolution = next.name(), "discarding stale account link resolution");
                return;
            }
            match &next {
                AuthWorkflowState::Succeeded { account } => {
                    info!(account = %account.name, id = account.id, "account linked")
                }
                AuthWorkflowState::Failed { message } => warn!(%message, "account link failed"),
                _ => {}
            }
            flight.completion = None;
            shared.transition(&mut flight, next);
        })
    }

    /// Abandons the flow awaiting completion. The cancel signal to the gateway
    /// is best effort; the local transition always happens.
    pub fn cancel(&self) -> Result<(), AuthLinkError> {
        {
            let mut flight = self.shared.flight.lock();
            if flight.state != AuthWorkflowState::AwaitingCompletion {
                return Err(AuthLinkError::NotAwaiting {
                    state: flight.state.name(),
                });
            }
            self.shared
                .transition(&mut flight, AuthWorkflowState::Cancelled);
        }
        info!("account link cancelled");
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(err) = api.cancel_auth().await {
                debug!(%err, "cancel-auth signal not delivered");
            }
        });
        Ok(())
    }

    /// Drops any flight, including a pending completion, and returns to Idle.
    pub fn reset(&self) {
        let mut flight = self.shared.flight.lock();
        flight.id += 1;
        flight.completion = None;
        flight.session = None;
        if flight.state != AuthWorkflowState::Idle {
            self.shared.transition(&mut flight, AuthWorkflowState::Idle);
        }
    }

    /// Resolves with the next terminal state (immediately if already terminal).
    pub async fn wait_terminal(&self) -> AuthWorkflowState {
        let mut states = self.subscribe();
        let terminal = match states.wait_for(AuthWorkflowState::is_terminal).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        terminal.unwrap_or_else(|| self.state())
    }

    /// Gateway-side view of the flow; informational only.
    pub async fn server_status(&self) -> GatewayResult<AuthStatus> {
        self.api.auth_status().await
    }
}

fn resolve(resolution: GatewayResult<CompleteAuthResponse>) -> AuthWorkflowState {
    match resolution {
        Ok(response) if response.success => match response.account {
            Some(account) => AuthWorkflowState::Succeeded { account },
            None => AuthWorkflowState::Failed {
                message: "gateway reported success without an account".to_string(),
            },
        },
        Ok(response) => AuthWorkflowState::Failed {
            message: response
                .detail
                .or(response.message)
                .unwrap_or_else(|| "authentication failed".to_string()),
        },
        Err(GatewayError::Status { status: 408, detail }) => AuthWorkflowState::Failed {
            message: format!("timed out waiting for sign-in: {detail}"),
        },
        Err(err) => AuthWorkflowState::Failed {
            message: err.to_string(),
        },
    }
}
