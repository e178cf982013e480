use crate::scheduler::RefreshTask;
use crate::stream::ReconnectPolicy;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const BASE_URL_ENV: &str = "GATEDECK_BASE_URL";
pub const SECRET_KEY_ENV: &str = "GATEDECK_SECRET_KEY";

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub base_url: String,
    pub secret_key: Option<String>,
    pub request_timeout: Duration,
    pub logs: LogSettings,
    pub refresh: RefreshSettings,
    /// File the values were read from, if any.
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub capacity: usize,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub poll_interval: Duration,
}

impl LogSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: self.reconnect_delay,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            capacity: crate::logs::DEFAULT_CAPACITY,
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            poll_interval: crate::fallback::DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub accounts: Duration,
    pub credits: Duration,
    pub token_renewal: Duration,
}

impl RefreshSettings {
    pub fn interval(&self, task: RefreshTask) -> Duration {
        match task {
            RefreshTask::Accounts => self.accounts,
            RefreshTask::Credits => self.credits,
            RefreshTask::TokenRenewal => self.token_renewal,
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            accounts: Duration::from_secs(30),
            credits: Duration::from_secs(60),
            token_renewal: Duration::from_secs(300),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            secret_key: None,
            request_timeout: Duration::from_secs(30),
            logs: LogSettings::default(),
            refresh: RefreshSettings::default(),
            source: None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no secret key configured")]
    Missing,
    #[error("dashboard configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => format!(
                "No secret key configured. Set `dashboard.secret_key` in gatedeck.yaml, \
                 export {SECRET_KEY_ENV}, or pass --secret-key."
            ),
            Self::Invalid(detail) => format!("{detail}. Update gatedeck.yaml."),
        }
    }
}

impl DashboardConfig {
    /// Resolves configuration from `explicit` (or the first candidate file that
    /// exists), then applies `.env` and environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigError::Invalid(format!(
                    "config file {} does not exist",
                    path.display()
                )))
            }
            Some(path) => Some(path.to_path_buf()),
            None => locate_config_file(),
        };
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: GatedeckFile = serde_yaml::from_str(contents)
            .map_err(|err| ConfigError::Invalid(format!("invalid gatedeck.yaml: {err}")))?;
        let config = resolve_dashboard_section(file.dashboard.unwrap_or_default());
        config.validate()?;
        Ok(config)
    }

    /// Applies `GATEDECK_BASE_URL` / `GATEDECK_SECRET_KEY` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(key) = lookup(SECRET_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.secret_key = Some(key.trim().to_string());
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, ConfigError> {
        self.base_url = base_url.into();
        self.validate()?;
        Ok(self)
    }

    pub fn secret_key(&self) -> Result<&str, ConfigError> {
        self.secret_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("base_url `{}`: {err}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base_url must use http or https, got `{}`",
                url.scheme()
            )));
        }
        let intervals = [
            ("request_timeout_secs", self.request_timeout),
            ("logs.reconnect_delay_secs", self.logs.reconnect_delay),
            ("logs.poll_interval_secs", self.logs.poll_interval),
            ("refresh.accounts_secs", self.refresh.accounts),
            ("refresh.credits_secs", self.refresh.credits),
            ("refresh.token_renewal_secs", self.refresh.token_renewal),
        ];
        for (field, value) in intervals {
            if value < Duration::from_secs(1) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be at least 1 second"
                )));
            }
        }
        if self.logs.capacity == 0 {
            return Err(ConfigError::Invalid("logs.capacity must be at least 1".into()));
        }
        if self.logs.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "logs.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_dashboard_section(section: DashboardSection) -> DashboardConfig {
    let defaults = DashboardConfig::default();
    let logs = section.logs.unwrap_or_default();
    let refresh = section.refresh.unwrap_or_default();
    let secs = |value: Option<u64>, fallback: Duration| value.map(Duration::from_secs).unwrap_or(fallback);
    DashboardConfig {
        base_url: section
            .base_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.base_url),
        secret_key: section
            .secret_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty()),
        request_timeout: secs(section.request_timeout_secs, defaults.request_timeout),
        logs: LogSettings {
            capacity: logs.capacity.unwrap_or(defaults.logs.capacity),
            reconnect_delay: secs(logs.reconnect_delay_secs, defaults.logs.reconnect_delay),
            max_reconnect_attempts: logs
                .max_reconnect_attempts
                .unwrap_or(defaults.logs.max_reconnect_attempts),
            poll_interval: secs(logs.poll_interval_secs, defaults.logs.poll_interval),
        },
        refresh: RefreshSettings {
            accounts: secs(refresh.accounts_secs, defaults.refresh.accounts),
            credits: secs(refresh.credits_secs, defaults.refresh.credits),
            token_renewal: secs(refresh.token_renewal_secs, defaults.refresh.token_renewal),
        },
        source: None,
    }
}

fn locate_config_file() -> Option<PathBuf> {
    gatedeck_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn gatedeck_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("gatedeck");
        paths.push(config_dir.join("gatedeck.yaml"));
        paths.push(config_dir.join("gatedeck.yml"));
        let home_dir = base.home_dir().join(".gatedeck");
        paths.push(home_dir.join("gatedeck.yaml"));
        paths.push(home_dir.join("gatedeck.yml"));
    }
    paths.push(PathBuf::from("gatedeck.yaml"));
    paths
}

#[derive(Debug, Default, Deserialize)]
struct GatedeckFile {
    dashboard: Option<DashboardSection>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardSection {
    base_url: Option<String>,
    secret_key: Option<String>,
    request_timeout_secs: Option<u64>,
    logs: Option<LogsSection>,
    refresh: Option<RefreshSection>,
}

#[derive(Debug, Default, Deserialize)]
struct LogsSection {
    capacity: Option<usize>,
    reconnect_delay_secs: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshSection {
    accounts_secs: Option<u64>,
    credits_secs: Option<u64>,
    token_renewal_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_documented_defaults() {
        let config = DashboardConfig::from_yaml_str("dashboard: {}\n").expect("defaults");
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.logs.capacity, 500);
        assert_eq!(config.logs.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(config.refresh.interval(RefreshTask::Credits), Duration::from_secs(60));
        assert_eq!(config.secret_key(), Err(ConfigError::Missing));
    }

    #[test]
    fn reads_every_section() {
        let config = DashboardConfig::from_yaml_str(
            r#"
dashboard:
  base_url: "https://gateway.internal:9443"
  secret_key: " s3cret "
  request_timeout_secs: 10
  logs:
    capacity: 200
    reconnect_delay_secs: 1
    max_reconnect_attempts: 2
    poll_interval_secs: 5
  refresh:
    accounts_secs: 15
    credits_secs: 45
    token_renewal_secs: 600
"#,
        )
        .expect("full config");
        assert_eq!(config.base_url, "https://gateway.internal:9443");
        assert_eq!(config.secret_key(), Ok("s3cret"));
        assert_eq!(config.logs.capacity, 200);
        assert_eq!(config.logs.reconnect_policy().max_attempts, 2);
        assert_eq!(config.logs.poll_interval, Duration::from_secs(5));
        assert_eq!(config.refresh.interval(RefreshTask::TokenRenewal), Duration::from_secs(600));
    }

    #[test]
    fn rejects_bad_values_naming_the_field() {
        let err = DashboardConfig::from_yaml_str("dashboard:\n  logs:\n    poll_interval_secs: 0\n")
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid("logs.poll_interval_secs must be at least 1 second".into())
        );

        let err = DashboardConfig::from_yaml_str("dashboard:\n  base_url: ftp://gateway\n")
            .unwrap_err();
        assert!(err.user_message().contains("http or https"));

        let err = DashboardConfig::from_yaml_str("dashboard:\n  logs:\n    capacity: 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(detail) if detail.contains("capacity")));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config =
            DashboardConfig::from_yaml_str("dashboard:\n  base_url: http://file:8000\n").expect("file");
        let env: HashMap<&str, &str> = HashMap::from([
            (BASE_URL_ENV, "http://env:9000"),
            (SECRET_KEY_ENV, "from-env"),
        ]);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.base_url, "http://env:9000");
        assert_eq!(config.secret_key(), Ok("from-env"));

        config.apply_overrides(|_| Some("   ".to_string()));
        assert_eq!(config.base_url, "http://env:9000");
    }

    #[test]
    fn loads_an_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gatedeck.yaml");
        fs::write(&path, "dashboard:\n  refresh:\n    accounts_secs: 12\n").expect("write");
        let config = DashboardConfig::from_file(&path).expect("load");
        assert_eq!(config.refresh.accounts, Duration::from_secs(12));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            DashboardConfig::load(Some(&missing)),
            Err(ConfigError::Invalid(_))
        ));
    }
}
