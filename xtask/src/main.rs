use anyhow::{ensure, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use gatedeck_core::{telemetry, LogEntry, LogLevel, SharedLogSink, TranscriptStore};
use tempfile::TempDir;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Gatedeck")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push a canned feed through the log pipeline and export it, offline.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = TranscriptStore::new(temp_dir.path().join("transcripts"));
    let sink = SharedLogSink::with_capacity(4);

    let start = Utc::now() - Duration::seconds(10);
    let feed = [
        (0, "INFO", "request routed to account Work"),
        (1, "WARNING", "account Personal near quota"),
        (2, "ERROR", "upstream returned 502"),
        (3, "INFO", "token refreshed for Work"),
        (4, "ERROR", "upstream returned 429"),
    ];
    for (offset, level, message) in feed {
        let payload = feed_line(start + Duration::seconds(offset), level, message);
        sink.append(LogEntry::decode(&payload));
    }
    sink.append(LogEntry::decode("{'python': 'repr payload'}"));

    ensure!(sink.len() == 4, "sink exceeded its capacity");
    sink.set_filter(Some(LogLevel::Error), "upstream");
    let visible = sink.visible_snapshot();
    ensure!(visible.len() == 2, "expected two visible errors after eviction");

    let path = store.save(&sink)?;
    info!(
        stored = sink.len(),
        visible = visible.len(),
        path = %path.display(),
        "smoke transcript written"
    );
    Ok(())
}

fn feed_line(timestamp: chrono::DateTime<Utc>, level: &str, message: &str) -> String {
    format!(
        r#"{{"timestamp":"{}","level":"{level}","message":"{message}"}}"#,
        timestamp.to_rfc3339()
    )
}
