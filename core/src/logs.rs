use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

/// Number of entries the dashboard keeps in memory.
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [Self::Debug, Self::Info, Self::Warning, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown log level `{0}`")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            _ => Err(UnknownLogLevel(value.to_string())),
        }
    }
}

/// One line of the gateway's log feed. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }

    /// Wraps an undecodable feed payload so it still reaches the operator.
    pub fn raw(payload: &str) -> Self {
        Self::new(Utc::now(), LogLevel::Info, payload.trim())
    }

    /// Decodes a structured `{timestamp, level, message}` payload.
    pub fn parse(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload.trim()).ok()?;
        Self::from_value(&value)
    }

    /// Structured decode with the raw fallback applied.
    pub fn decode(payload: &str) -> Self {
        Self::parse(payload).unwrap_or_else(|| {
            tracing::debug!(len = payload.len(), "log payload is not structured, keeping it raw");
            Self::raw(payload)
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let timestamp = parse_timestamp(value.get("timestamp")?.as_str()?)?;
        let level = value.get("level")?.as_str()?.parse().ok()?;
        let message = value.get("message")?.as_str()?;
        Some(Self::new(timestamp, level, message))
    }

    /// Transcript form: `timestamp [level] message`.
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.to_rfc3339(),
            self.level,
            self.message
        )
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Naive ISO-8601 from the gateway is UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Visibility predicate: a level (`None` = all) and a case-insensitive needle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    level: Option<LogLevel>,
    needle: String,
}

impl LogFilter {
    pub fn new(level: Option<LogLevel>, text: &str) -> Self {
        Self {
            level,
            needle: text.to_lowercase(),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn level(&self) -> Option<LogLevel> {
        self.level
    }

    pub fn text(&self) -> &str {
        &self.needle
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        self.needle.is_empty() || entry.message.to_lowercase().contains(&self.needle)
    }
}

/// Bounded, arrival-ordered store of log entries.
#[derive(Debug, Clone)]
pub struct LogSink {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    filter: LogFilter,
    total_appended: u64,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LogSink {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            filter: LogFilter::all(),
            total_appended: 0,
        }
    }

    /// Appends, evicting the oldest entry first when full. Never rejects.
    pub fn append(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.total_appended += 1;
    }

    pub fn set_filter(&mut self, level: Option<LogLevel>, text: &str) {
        self.filter = LogFilter::new(level, text);
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    /// Entries passing the current filter, oldest first. Clone the iterator to
    /// walk it again.
    pub fn visible(&self) -> impl Iterator<Item = &LogEntry> + Clone + '_ {
        let filter = &self.filter;
        self.entries.iter().filter(move |entry| filter.matches(entry))
    }

    pub fn export_visible(&self) -> String {
        let mut out = String::new();
        for entry in self.visible() {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        out
    }

    /// The newest `n` stored entries, oldest first, regardless of the filter.
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &LogEntry> + '_ {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count of appends over the sink's lifetime, including evicted entries.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}

/// Sink handle shared between the active log source and the view layer.
#[derive(Clone)]
pub struct SharedLogSink {
    inner: Arc<RwLock<LogSink>>,
    appended: Arc<watch::Sender<u64>>,
}

impl Default for SharedLogSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SharedLogSink {
    pub fn with_capacity(capacity: usize) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(LogSink::with_capacity(capacity))),
            appended: Arc::new(appended),
        }
    }

    pub fn append(&self, entry: LogEntry) {
        let total = {
            let mut sink = self.inner.write();
            sink.append(entry);
            sink.total_appended()
        };
        self.appended.send_replace(total);
    }

    pub fn set_filter(&self, level: Option<LogLevel>, text: &str) {
        self.inner.write().set_filter(level, text);
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Runs `f` against the sink under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&LogSink) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn visible_snapshot(&self) -> Vec<LogEntry> {
        self.read(|sink| sink.visible().cloned().collect())
    }

    pub fn export_visible(&self) -> String {
        self.read(LogSink::export_visible)
    }

    pub fn len(&self) -> usize {
        self.read(LogSink::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read(LogSink::is_empty)
    }

    /// Watch channel carrying `total_appended()` after every append.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}
