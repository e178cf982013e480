use gatedeck_core::scheduler::RefreshTask;
use gatedeck_core::testing::{ts, Call, FakeFeed, FakeGateway};
use gatedeck_core::{
    AuthMethod, AuthWorkflowState, ConnectionState, DashboardConfig, DashboardSession,
    GatewayError, LogEntry, LogLevel, SessionCredential, SessionEnd,
};
use std::sync::Arc;
use std::time::Duration;

fn assemble(api: &Arc<FakeGateway>, feed: &Arc<FakeFeed>) -> DashboardSession {
    DashboardSession::assemble(
        api.clone(),
        feed.clone(),
        SessionCredential::new("operator-token"),
        &DashboardConfig::default(),
    )
}

fn batch(seconds: &[i64]) -> Vec<LogEntry> {
    seconds
        .iter()
        .map(|s| LogEntry::new(ts(*s), LogLevel::Info, format!("t={s}")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn invalidation_during_fallback_tears_everything_down() {
    let api = FakeGateway::new();
    let feed = FakeFeed::failing();
    let session = assemble(&api, &feed);
    session.start();

    let _completion = api.hold_completion();
    session
        .auth()
        .start(AuthMethod::Github, "Work")
        .await
        .expect("link starts");

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(session.stream().state(), ConnectionState::PollingFallback);
    assert!(session.stream().fallback().is_running());

    api.fail_next(Call::FetchLogs, GatewayError::SessionInvalid);
    let reason = tokio::time::timeout(Duration::from_secs(5), session.wait_ended())
        .await
        .expect("session ends");
    assert_eq!(reason, SessionEnd::Invalidated);

    assert!(!session.is_active());
    assert_eq!(session.stream().state(), ConnectionState::Disconnected);
    assert!(!session.stream().fallback().is_running());
    assert!(session.scheduler().running().is_empty());
    assert_eq!(session.auth().state(), AuthWorkflowState::Idle);

    let fetches = api.log_fetches();
    let opens = feed.opens();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(api.log_fetches(), fetches);
    assert_eq!(feed.opens(), opens);
    assert_eq!(api.calls(Call::ListAccounts), 0);
    assert_eq!(api.calls(Call::RefreshAll), 0);
    assert_eq!(api.calls(Call::Logout), 0);
}

#[tokio::test(start_paused = true)]
async fn invalidation_from_a_refresh_uses_the_same_path() {
    let api = FakeGateway::new();
    let feed = FakeFeed::scripted(vec![]);
    let session = assemble(&api, &feed);
    api.fail_next(Call::ListAccounts, GatewayError::SessionInvalid);
    session.start();

    let reason = tokio::time::timeout(Duration::from_secs(40), session.wait_ended())
        .await
        .expect("session ends");
    assert_eq!(reason, SessionEnd::Invalidated);
    assert!(session.scheduler().running().is_empty());
    assert_eq!(session.stream().state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn backfill_and_fallback_share_the_cursor() {
    let api = FakeGateway::new();
    api.push_log_batch(Ok(batch(&[10, 20])));
    api.push_log_batch(Ok(batch(&[10, 20, 30])));
    let feed = FakeFeed::failing();
    let session = assemble(&api, &feed);

    assert_eq!(session.backfill().await.expect("backfill"), 2);
    session.start();
    tokio::time::sleep(Duration::from_secs(15)).await;

    let messages: Vec<_> = session
        .sink()
        .visible_snapshot()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages, ["t=10", "t=20", "t=30"]);
    assert_eq!(session.stream().cursor().get(), Some(ts(30)));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn credits_follow_the_active_view() {
    let api = FakeGateway::new();
    let session = assemble(&api, &FakeFeed::scripted(vec![]));
    session.start();
    assert!(session.scheduler().is_running(RefreshTask::Credits));

    tokio::time::sleep(Duration::from_millis(60_500)).await;
    assert_eq!(api.calls(Call::UsageSummary), 0);
    assert_eq!(api.calls(Call::ListAccounts), 2);

    session.views().show(gatedeck_core::ActiveView::Credits);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.calls(Call::UsageSummary), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn clear_logs_empties_both_sides() {
    let api = FakeGateway::new();
    api.push_log_batch(Ok(batch(&[1, 2, 3])));
    let session = assemble(&api, &FakeFeed::scripted(vec![]));
    session.backfill().await.expect("backfill");
    assert_eq!(session.sink().len(), 3);

    session.clear_logs().await.expect("clear");
    assert!(session.sink().is_empty());
    assert_eq!(api.calls(Call::ClearLogs), 1);
    session.shutdown().await;
    assert_eq!(session.ended(), Some(SessionEnd::Shutdown));
}
