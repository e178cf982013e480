use clap::{Parser, Subcommand};
use gatedeck_core::{AuthMethod, LogLevel};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gatedeck", version, about = "Operator console for the multi-account API gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Path to gatedeck.yaml; defaults to the standard search locations.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Overrides `dashboard.base_url`.
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Overrides the configured secret key.
    #[arg(long, global = true, env = "GATEDECK_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow the gateway log until Ctrl-C.
    Tail {
        #[arg(long)]
        level: Option<LogLevel>,
        #[arg(long, default_value = "")]
        filter: String,
    },
    /// Link a new account through an external sign-in.
    Link {
        #[arg(long)]
        method: AuthMethod,
        #[arg(long)]
        name: String,
    },
    /// Write the gateway's recent log as a transcript.
    Export {
        /// Target file; defaults to a timestamped file in the transcript directory.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        level: Option<LogLevel>,
        #[arg(long, default_value = "")]
        filter: String,
    },
    /// Refresh the tokens of every account once.
    Renew,
}
