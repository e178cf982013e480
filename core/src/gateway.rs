use crate::api::{
    AccountList, AuthStatus, CompleteAuthResponse, FeedMessages, GatewayApi, LogFeedConnector,
    LogListing, LoginRequest, LoginResponse, RefreshAllResponse, StartAuthRequest,
    StartAuthResponse, UsageSummary,
};
use crate::auth::AuthMethod;
use crate::config::DashboardConfig;
use crate::error::{extract_detail, GatewayError, GatewayResult};
use crate::logs::LogEntry;
use crate::sse::SseDecoder;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

/// Header carrying the session credential on management calls.
pub const SESSION_HEADER: &str = "X-Session-Token";

/// Query parameter carrying the credential on the push feed, which cannot send headers.
pub const FEED_TOKEN_PARAM: &str = "token";

/// Authenticated token identifying the operator to the gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// The gateway rejected the credential; every component must tear down.
    Invalidated,
    /// The operator logged out.
    LoggedOut,
}

/// Wraps every outbound call with credential injection and uniform 401 handling.
pub struct SessionGateway {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    credential: RwLock<Option<SessionCredential>>,
    signals: broadcast::Sender<SessionSignal>,
}

impl SessionGateway {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        // No client-wide timeout: the log feed and complete-auth are long-lived.
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        let (signals, _) = broadcast::channel(16);
        Ok(Self {
            http,
            base_url,
            timeout,
            credential: RwLock::new(None),
            signals,
        })
    }

    pub fn from_config(config: &DashboardConfig) -> GatewayResult<Self> {
        Self::new(&config.base_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Push-feed URL with the credential as a query parameter.
    pub fn feed_url(&self, credential: &SessionCredential) -> GatewayResult<Url> {
        let mut url = self.endpoint("ui/api/logs/stream")?;
        url.query_pairs_mut()
            .append_pair(FEED_TOKEN_PARAM, credential.expose());
        Ok(url)
    }

    pub fn credential(&self) -> Option<SessionCredential> {
        self.credential.read().clone()
    }

    /// Adopts a credential obtained elsewhere (e.g. a previous login).
    pub fn set_credential(&self, credential: SessionCredential) {
        *self.credential.write() = Some(credential);
    }

    pub async fn login(&self, secret_key: &str) -> GatewayResult<SessionCredential> {
        let secret_key = secret_key.trim();
        if secret_key.is_empty() {
            return Err(GatewayError::Rejected("secret key is required".to_string()));
        }
        let url = self.endpoint("ui/login")?;
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&LoginRequest { secret_key })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                detail: extract_detail(&body),
            });
        }
        let body: LoginResponse = serde_json::from_slice(&response.bytes().await?)?;
        match (body.success, body.session_token) {
            (true, Some(token)) if !token.is_empty() => {
                let credential = SessionCredential::new(token);
                *self.credential.write() = Some(credential.clone());
                info!(gateway = %self.base_url, "logged in to gateway");
                Ok(credential)
            }
            _ => Err(GatewayError::Rejected(
                body.message.unwrap_or_else(|| "login rejected".to_string()),
            )),
        }
    }

    fn current(&self) -> GatewayResult<SessionCredential> {
        self.credential().ok_or(GatewayError::NotAuthenticated)
    }

    /// Drops `used` and signals invalidation, once per credential.
    fn invalidate(&self, used: &SessionCredential) {
        let cleared = {
            let mut guard = self.credential.write();
            if guard.as_ref() == Some(used) {
                *guard = None;
                true
            } else {
                false
            }
        };
        if cleared {
            warn!("gateway rejected the session credential; logging out");
            let _ = self.signals.send(SessionSignal::Invalidated);
        }
    }

    async fn check(&self, credential: &SessionCredential, response: Response) -> GatewayResult<Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate(credential);
            return Err(GatewayError::SessionInvalid);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                detail: extract_detail(&body),
            });
        }
        Ok(response)
    }

    async fn execute(
        &self,
        credential: &SessionCredential,
        request: RequestBuilder,
    ) -> GatewayResult<Response> {
        let response = request
            .header(SESSION_HEADER, credential.expose())
            .send()
            .await?;
        self.check(credential, response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let credential = self.current()?;
        let request = self.http.get(self.endpoint(path)?).timeout(self.timeout);
        let response = self.execute(&credential, request).await?;
        Self::decode(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: Option<&B>, timeout: Option<Duration>) -> GatewayResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let credential = self.current()?;
        let mut request = self.http.post(self.endpoint(path)?);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.execute(&credential, request).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl GatewayApi for SessionGateway {
    async fn fetch_logs(&self, credential: &SessionCredential) -> GatewayResult<Vec<LogEntry>> {
        let request = self
            .http
            .get(self.endpoint("ui/api/logs")?)
            .timeout(self.timeout);
        let response = self.execute(credential, request).await?;
        let listing: LogListing = Self::decode(response).await?;
        let total = listing.logs.len();
        let entries: Vec<LogEntry> = listing.logs.iter().filter_map(LogEntry::from_value).collect();
        if entries.len() < total {
            debug!(skipped = total - entries.len(), "pull endpoint returned undecodable entries");
        }
        Ok(entries)
    }

    async fn clear_logs(&self) -> GatewayResult<()> {
        let credential = self.current()?;
        let request = self
            .http
            .delete(self.endpoint("ui/api/logs")?)
            .timeout(self.timeout);
        self.execute(&credential, request).await?;
        Ok(())
    }

    async fn list_accounts(&self) -> GatewayResult<AccountList> {
        self.get_json("ui/accounts").await
    }

    async fn usage_summary(&self) -> GatewayResult<UsageSummary> {
        self.get_json("ui/api/usage/summary").await
    }

    async fn start_auth(&self, name: &str, method: AuthMethod) -> GatewayResult<StartAuthResponse> {
        let body = StartAuthRequest {
            name,
            method: method.wire_name(),
        };
        self.post_json("ui/accounts/start-auth", Some(&body), Some(self.timeout))
            .await
    }

    async fn complete_auth(&self) -> GatewayResult<CompleteAuthResponse> {
        // Blocks server-side until the operator finishes or the gateway times out.
        self.post_json::<(), _>("ui/accounts/complete-auth", None, None)
            .await
    }

    async fn cancel_auth(&self) -> GatewayResult<()> {
        let _: serde_json::Value = self
            .post_json::<(), _>("ui/accounts/cancel-auth", None, Some(self.timeout))
            .await?;
        Ok(())
    }

    async fn auth_status(&self) -> GatewayResult<AuthStatus> {
        self.get_json("ui/auth-status").await
    }

    async fn refresh_all_tokens(&self) -> GatewayResult<RefreshAllResponse> {
        self.post_json::<(), _>("ui/accounts/refresh-all", None, Some(self.timeout))
            .await
    }

    async fn logout(&self) -> GatewayResult<()> {
        let held = self.credential.write().take();
        let Some(credential) = held else {
            return Ok(());
        };
        let url = self.endpoint("ui/logout")?;
        let outcome = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header(SESSION_HEADER, credential.expose())
            .send()
            .await;
        if let Err(err) = outcome {
            debug!(%err, "server-side logout not delivered");
        }
        info!("logged out of gateway");
        let _ = self.signals.send(SessionSignal::LoggedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }
}

#[async_trait]
impl LogFeedConnector for SessionGateway {
    async fn open_feed(&self, credential: &SessionCredential) -> GatewayResult<FeedMessages> {
        let url = self.feed_url(credential)?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = self.check(credential, response).await?;
        let mut decoder = SseDecoder::new();
        let messages = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => Ok(decoder.push(&bytes)),
                Err(err) => Err(GatewayError::from(err)),
            })
            .flat_map(|batch| match batch {
                Ok(payloads) => stream::iter(payloads.into_iter().map(Ok).collect::<Vec<_>>()),
                Err(err) => stream::iter(vec![Err(err)]),
            })
            .boxed();
        Ok(messages)
    }
}
