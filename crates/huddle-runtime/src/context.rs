//! Builders shared by the subcommands.

use std::sync::Arc;

use huddle_enrich::{NotificationResolver, RestDirectory};
use huddle_session::{SessionManager, WsConnector};

use crate::config::RuntimeConfig;

pub fn build_session(config: &RuntimeConfig) -> anyhow::Result<SessionManager> {
    let connector = WsConnector::new(config.require_ws_url()?)
        .with_auth(config.auth_mode.clone())
        .with_buffer(config.outbound_buffer);
    Ok(SessionManager::new(Arc::new(connector), config.session_config()))
}

pub fn build_resolver(config: &RuntimeConfig) -> anyhow::Result<NotificationResolver> {
    let directory = RestDirectory::new(config.require_api_url()?)?.with_credential(config.credential());
    Ok(NotificationResolver::new(Arc::new(directory), config.resolver_config()))
}

/// Print one JSON line on stdout.
pub fn emit(line: &serde_json::Value) {
    println!("{line}");
}

/// Parse a JSON argument, `-` meaning stdin.
pub fn read_json_arg(arg: &str) -> anyhow::Result<serde_json::Value> {
    let text = if arg == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        arg.to_string()
    };
    Ok(serde_json::from_str(&text)?)
}
