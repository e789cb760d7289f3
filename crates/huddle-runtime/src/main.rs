//! huddle: real-time session and notification client.
//!
//! Wires the session manager, task progress tracker and notification
//! resolver behind a small CLI.

use clap::Parser;

mod cli;
mod cmd_enrich;
mod cmd_send;
mod cmd_watch;
mod config;
mod context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("HUDDLE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::RuntimeConfig::load(args.config.as_deref())?;
    config.apply_overrides(&args);

    match &args.command {
        cli::Command::Watch(opts) => {
            tracing::info!("huddle watch starting");
            cmd_watch::cmd_watch(&config, opts).await?;
        }
        cli::Command::Enrich(opts) => {
            cmd_enrich::cmd_enrich(&config, opts).await?;
        }
        cli::Command::Send(opts) => {
            cmd_send::cmd_send(&config, opts).await?;
        }
    }

    Ok(())
}
