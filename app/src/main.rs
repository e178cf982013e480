use clap::Parser;
use gatedeck::commands;
use gatedeck::{Cli, Command};
use gatedeck_core::{telemetry, AuthWorkflowState, DashboardSession, TranscriptStore};
use std::io;
use std::process::ExitCode;

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    telemetry::init_tracing(telemetry::env_filter_or("info"))?;

    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;
    let secret = commands::resolve_secret(&cli, &config)?;
    let session = DashboardSession::establish(&config, &secret).await?;
    let mut stdout = io::stdout();

    let outcome = match &cli.command {
        Command::Tail { level, filter } => {
            commands::tail(&session, *level, filter, &mut stdout, ctrl_c())
                .await
                .map(|_| ExitCode::SUCCESS)
        }
        Command::Link { method, name } => {
            commands::link(&session, *method, name, &mut stdout, ctrl_c())
                .await
                .map(|state| match state {
                    AuthWorkflowState::Succeeded { .. } => ExitCode::SUCCESS,
                    _ => ExitCode::FAILURE,
                })
        }
        Command::Export { out, level, filter } => {
            let store = TranscriptStore::default_location();
            commands::export(&session, &store, out.as_deref(), *level, filter)
                .await
                .map(|path| {
                    println!("{}", path.display());
                    ExitCode::SUCCESS
                })
        }
        Command::Renew => commands::renew(&session).await.map(|count| {
            println!("Renewed tokens for {count} account(s)");
            ExitCode::SUCCESS
        }),
    };

    session.shutdown().await;
    outcome
}
