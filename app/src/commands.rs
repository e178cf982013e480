use crate::cli::Cli;
use crate::render::{auth_outcome, auth_prompt, connection_line, LogTail};
use anyhow::{anyhow, Context, Result};
use gatedeck_core::scheduler::ActiveView;
use gatedeck_core::{
    AuthMethod, AuthWorkflowState, DashboardConfig, DashboardSession, LogLevel, TranscriptStore,
};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Loads configuration and applies the command-line overrides.
pub fn resolve_config(cli: &Cli) -> Result<DashboardConfig> {
    let config = DashboardConfig::load(cli.config.as_deref())
        .map_err(|err| anyhow!(err.user_message()))?;
    match &cli.base_url {
        Some(url) => config
            .with_base_url(url.clone())
            .map_err(|err| anyhow!(err.user_message())),
        None => Ok(config),
    }
}

pub fn resolve_secret(cli: &Cli, config: &DashboardConfig) -> Result<String> {
    if let Some(key) = cli.secret_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }
    config
        .secret_key()
        .map(str::to_string)
        .map_err(|err| anyhow!(err.user_message()))
}

/// Follows the log until `stop` resolves or the session ends.
pub async fn tail(
    session: &DashboardSession,
    level: Option<LogLevel>,
    filter: &str,
    out: &mut impl Write,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    let sink = session.sink();
    sink.set_filter(level, filter);
    session.views().show(ActiveView::Logs);
    if let Err(err) = session.backfill().await {
        warn!(%err, "log backfill failed");
    }
    for entry in sink.visible_snapshot() {
        writeln!(out, "{}", entry.to_line())?;
    }
    let mut tail = LogTail::after(sink);
    let mut appended = sink.subscribe();
    let mut states = session.stream().subscribe();
    session.start();

    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            reason = session.wait_ended() => {
                eprintln!("session ended: {reason:?}");
                break;
            }
            changed = appended.changed() => {
                if changed.is_err() {
                    break;
                }
                for line in tail.drain(sink) {
                    writeln!(out, "{line}")?;
                }
                out.flush()?;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("{}", connection_line(state));
            }
        }
    }
    Ok(())
}

/// Runs the account-link workflow to a terminal state. `cancel` resolving
/// while the sign-in is pending abandons it.
pub async fn link(
    session: &DashboardSession,
    method: AuthMethod,
    name: &str,
    out: &mut impl Write,
    cancel: impl Future<Output = ()>,
) -> Result<AuthWorkflowState> {
    let workflow = session.auth();
    let pending = workflow.start(method, name).await;
    let auth_session = match pending {
        Ok(auth_session) => auth_session,
        Err(err) => {
            let state = workflow.state();
            writeln!(out, "{err}")?;
            return Ok(state);
        }
    };
    write!(out, "{}", auth_prompt(&auth_session))?;
    writeln!(out, "Waiting for sign-in to finish (Ctrl-C to cancel)...")?;
    out.flush()?;

    let state = tokio::select! {
        state = workflow.wait_terminal() => state,
        _ = cancel => {
            workflow.cancel().ok();
            workflow.state()
        }
    };
    writeln!(out, "{}", auth_outcome(&state))?;
    Ok(state)
}

/// Backfills and writes the visible transcript. Returns the written path.
pub async fn export(
    session: &DashboardSession,
    store: &TranscriptStore,
    out: Option<&Path>,
    level: Option<LogLevel>,
    filter: &str,
) -> Result<PathBuf> {
    session.sink().set_filter(level, filter);
    let fetched = session.backfill().await.context("failed to fetch gateway logs")?;
    let path = match out {
        Some(path) => {
            store.save_as(session.sink(), path)?;
            path.to_path_buf()
        }
        None => store.save(session.sink())?,
    };
    info!(fetched, path = %path.display(), "transcript exported");
    Ok(path)
}

pub async fn renew(session: &DashboardSession) -> Result<u32> {
    let response = session
        .api()
        .refresh_all_tokens()
        .await
        .context("token refresh failed")?;
    if !response.success {
        return Err(anyhow!(response
            .message
            .unwrap_or_else(|| "gateway refused to refresh tokens".to_string())));
    }
    Ok(response.refreshed_count)
}
