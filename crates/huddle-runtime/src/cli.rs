//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "huddle", about = "real-time session and notification client")]
pub struct Cli {
    /// TOML config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Push endpoint, e.g. ws://localhost:8000/ws/notifications/
    #[arg(long, env = "HUDDLE_WS_URL", global = true)]
    pub ws_url: Option<String>,

    /// Base URL of the REST collaborators
    #[arg(long = "api-url", env = "HUDDLE_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Session token
    #[arg(long, env = "HUDDLE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect and print state changes, task progress and notifications
    Watch(WatchOpts),
    /// Resolve the foreign keys of one notification payload
    Enrich(EnrichOpts),
    /// Connect, send one JSON frame and disconnect
    Send(SendOpts),
}

#[derive(clap::Args, Default)]
pub struct WatchOpts {
    /// Only print progress resolved for this expected task id
    #[arg(long)]
    pub task: Option<String>,
}

#[derive(clap::Args)]
pub struct EnrichOpts {
    /// JSON object, or `-` to read stdin
    pub payload: String,
}

#[derive(clap::Args)]
pub struct SendOpts {
    /// JSON frame to send
    pub payload: String,

    /// Seconds to wait for the connection
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watch_with_task_filter() {
        let cli = Cli::try_parse_from([
            "huddle",
            "--ws-url",
            "ws://host/ws",
            "watch",
            "--task",
            "rec-42",
        ])
        .unwrap();
        assert_eq!(cli.ws_url.as_deref(), Some("ws://host/ws"));
        match cli.command {
            Command::Watch(opts) => assert_eq!(opts.task.as_deref(), Some("rec-42")),
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "huddle",
            "enrich",
            r#"{"meeting_id":1}"#,
            "--api-url",
            "http://api",
            "--token",
            "t",
        ])
        .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://api"));
        assert_eq!(cli.token.as_deref(), Some("t"));
        match cli.command {
            Command::Enrich(opts) => assert_eq!(opts.payload, r#"{"meeting_id":1}"#),
            _ => panic!("expected enrich"),
        }
    }

    #[test]
    fn send_timeout_default() {
        let cli = Cli::try_parse_from(["huddle", "send", "{}"]).unwrap();
        match cli.command {
            Command::Send(opts) => assert_eq!(opts.timeout, 10),
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["huddle"]).is_err());
    }
}
