use gatedeck_core::testing::{ts, FakeFeed, FakeGateway};
use gatedeck_core::{
    ConnectionState, DashboardConfig, DashboardSession, LogEntry, LogLevel, SessionCredential,
};
use std::time::Duration;

fn structured(secs: i64, level: &str, message: &str) -> String {
    format!(
        r#"{{"timestamp":"{}","level":"{level}","message":"{message}"}}"#,
        ts(secs).to_rfc3339()
    )
}

#[tokio::test(start_paused = true)]
async fn stream_hands_over_to_polling_without_duplicates() {
    let api = FakeGateway::new();
    // Already delivered by the stream (t=5, t=6), then one new entry.
    api.push_log_batch(Ok(vec![
        LogEntry::new(ts(5), LogLevel::Error, "upstream 502"),
        LogEntry::new(ts(6), LogLevel::Info, "retry scheduled"),
        LogEntry::new(ts(7), LogLevel::Info, "retry succeeded"),
    ]));
    let feed = FakeFeed::scripted(vec![vec![
        structured(5, "ERROR", "upstream 502"),
        structured(6, "info", "retry scheduled"),
        "plain text line".to_string(),
    ]]);
    let session = DashboardSession::assemble(
        api.clone(),
        feed.clone(),
        SessionCredential::new("tok"),
        &DashboardConfig::default(),
    );
    let mut states = session.stream().subscribe();
    session.start();

    states
        .wait_for(|state| *state == ConnectionState::PollingFallback)
        .await
        .expect("falls back");
    // The scripted connection drops after delivering (attempt 1), then four
    // failed reopens exhaust the budget.
    assert_eq!(feed.opens(), 5);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let entries = session.sink().visible_snapshot();
    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        ["upstream 502", "retry scheduled", "plain text line", "retry succeeded"]
    );
    assert_eq!(entries[1].level, LogLevel::Info);
    assert_eq!(entries[2].level, LogLevel::Info);

    session.sink().set_filter(Some(LogLevel::Error), "");
    assert_eq!(
        session.sink().export_visible(),
        format!("{} [ERROR] upstream 502\n", ts(5).to_rfc3339())
    );
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sink_capacity_comes_from_config() {
    let api = FakeGateway::new();
    let mut config = DashboardConfig::default();
    config.logs.capacity = 3;
    let payloads = (0..10)
        .map(|i| structured(i, "INFO", &format!("m{i}")))
        .collect();
    let session = DashboardSession::assemble(
        api,
        FakeFeed::scripted(vec![payloads]),
        SessionCredential::new("tok"),
        &config,
    );
    session.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sink = session.sink();
    assert_eq!(sink.len(), 3);
    assert_eq!(sink.read(|s| s.total_appended()), 10);
    let first = sink.visible_snapshot().remove(0);
    assert_eq!(first.message, "m7");
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn backfilled_entries_are_not_repeated_by_the_feed() {
    let api = FakeGateway::new();
    api.push_log_batch(Ok(vec![
        LogEntry::new(ts(5), LogLevel::Error, "upstream 502"),
        LogEntry::new(ts(6), LogLevel::Info, "retry scheduled"),
    ]));
    // The gateway replays its whole buffer when the feed opens.
    let feed = FakeFeed::scripted(vec![vec![
        structured(5, "ERROR", "upstream 502"),
        structured(6, "INFO", "retry scheduled"),
        structured(7, "INFO", "retry succeeded"),
    ]]);
    let session = DashboardSession::assemble(
        api,
        feed,
        SessionCredential::new("tok"),
        &DashboardConfig::default(),
    );

    assert_eq!(session.backfill().await.expect("backfill"), 2);
    session.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages: Vec<_> = session
        .sink()
        .visible_snapshot()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages, ["upstream 502", "retry scheduled", "retry succeeded"]);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_skips_the_previous_connections_entries() {
    let api = FakeGateway::new();
    let feed = FakeFeed::scripted(vec![
        vec![structured(5, "ERROR", "upstream 502")],
        vec![
            structured(5, "ERROR", "upstream 502"),
            structured(6, "INFO", "new"),
        ],
    ]);
    let session = DashboardSession::assemble(
        api,
        feed.clone(),
        SessionCredential::new("tok"),
        &DashboardConfig::default(),
    );
    session.start();
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(feed.opens(), 2);
    let messages: Vec<_> = session
        .sink()
        .visible_snapshot()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages, ["upstream 502", "new"]);
    session.shutdown().await;
}
