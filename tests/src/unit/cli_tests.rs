use clap::Parser;
use gatedeck::commands;
use gatedeck::{Cli, Command};
use gatedeck_core::api::{CompleteAuthResponse, StartAuthResponse};
use gatedeck_core::testing::{account, ts, Call, FakeFeed, FakeGateway};
use gatedeck_core::{
    AuthMethod, AuthWorkflowState, DashboardConfig, DashboardSession, LogEntry, LogLevel,
    SessionCredential, TranscriptStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn session(api: &Arc<FakeGateway>) -> DashboardSession {
    DashboardSession::assemble(
        api.clone(),
        FakeFeed::scripted(vec![]),
        SessionCredential::new("tok"),
        &DashboardConfig::default(),
    )
}

#[test]
fn parses_subcommands_and_global_flags() {
    let cli = Cli::try_parse_from([
        "gatedeck",
        "link",
        "--method",
        "builder_id",
        "--name",
        "Team",
        "--base-url",
        "http://gateway:8000",
    ])
    .expect("link parses");
    assert_eq!(cli.base_url.as_deref(), Some("http://gateway:8000"));
    match cli.command {
        Command::Link { method, name } => {
            assert_eq!(method, AuthMethod::BuilderId);
            assert_eq!(name, "Team");
        }
        other => panic!("unexpected command {other:?}"),
    }

    let cli = Cli::try_parse_from(["gatedeck", "tail", "--level", "warn", "--filter", "quota"])
        .expect("tail parses");
    match cli.command {
        Command::Tail { level, filter } => {
            assert_eq!(level, Some(LogLevel::Warning));
            assert_eq!(filter, "quota");
        }
        other => panic!("unexpected command {other:?}"),
    }

    assert!(Cli::try_parse_from(["gatedeck", "link", "--method", "okta", "--name", "x"]).is_err());
}

#[test]
fn secret_flag_wins_over_config() {
    let cli = Cli::try_parse_from(["gatedeck", "renew", "--secret-key", " flag-key "]).expect("parse");
    let config = DashboardConfig {
        secret_key: Some("file-key".into()),
        ..DashboardConfig::default()
    };
    assert_eq!(commands::resolve_secret(&cli, &config).expect("secret"), "flag-key");
}

#[tokio::test]
async fn link_prints_the_url_and_reports_success() {
    let api = FakeGateway::new();
    api.set_start_response(Ok(StartAuthResponse {
        success: true,
        auth_url: Some("https://auth.example/login?idp=Github".into()),
        ..Default::default()
    }));
    let completion = api.hold_completion();
    completion
        .send(Ok(CompleteAuthResponse {
            success: true,
            account: Some(account(5, "Work")),
            ..Default::default()
        }))
        .expect("receiver parked");
    let session = session(&api);

    let mut out = Vec::new();
    let state = commands::link(
        &session,
        AuthMethod::Github,
        "Work",
        &mut out,
        std::future::pending(),
    )
    .await
    .expect("link");
    let printed = String::from_utf8(out).expect("utf8");
    assert!(printed.contains("https://auth.example/login?idp=Github"));
    assert!(printed.contains("Linked account \"Work\""));
    assert!(matches!(state, AuthWorkflowState::Succeeded { .. }));
    session.shutdown().await;
}

#[tokio::test]
async fn interrupting_link_cancels_it() {
    let api = FakeGateway::new();
    let _completion = api.hold_completion();
    let session = session(&api);

    let mut out = Vec::new();
    let state = commands::link(&session, AuthMethod::Google, "Work", &mut out, async {})
        .await
        .expect("link");
    assert_eq!(state, AuthWorkflowState::Cancelled);
    assert!(String::from_utf8(out).expect("utf8").contains("cancelled"));
    tokio::task::yield_now().await;
    session.shutdown().await;
}

#[tokio::test]
async fn blank_link_name_is_reported_without_a_request() {
    let api = FakeGateway::new();
    let session = session(&api);
    let mut out = Vec::new();
    let state = commands::link(&session, AuthMethod::Google, "  ", &mut out, std::future::pending())
        .await
        .expect("link");
    assert_eq!(state, AuthWorkflowState::Idle);
    assert_eq!(api.calls(Call::StartAuth), 0);
    session.shutdown().await;
}

#[tokio::test]
async fn export_writes_the_filtered_transcript() {
    let api = FakeGateway::new();
    api.push_log_batch(Ok(vec![
        LogEntry::new(ts(1), LogLevel::Info, "routed to Work"),
        LogEntry::new(ts(2), LogLevel::Warning, "Personal near quota"),
        LogEntry::new(ts(3), LogLevel::Warning, "Team near quota"),
    ]));
    let session = session(&api);
    let dir = TempDir::new().expect("tempdir");
    let store = TranscriptStore::new(dir.path().join("transcripts"));
    let out = dir.path().join("warnings.log");

    let path = commands::export(&session, &store, Some(&out), Some(LogLevel::Warning), "team")
        .await
        .expect("export");
    assert_eq!(path, out);
    let written = std::fs::read_to_string(&out).expect("read");
    assert_eq!(written, format!("{} [WARNING] Team near quota\n", ts(3).to_rfc3339()));

    let default_path = commands::export(&session, &store, None, None, "")
        .await
        .expect("export to store");
    assert!(default_path.starts_with(store.root()));
    session.shutdown().await;
}

#[tokio::test]
async fn renew_reports_the_count() {
    let api = FakeGateway::new();
    api.set_accounts(vec![account(1, "Work"), account(2, "Personal"), account(3, "Team")]);
    let session = session(&api);
    assert_eq!(commands::renew(&session).await.expect("renew"), 3);
    session.shutdown().await;
}
