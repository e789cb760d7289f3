//! Runtime configuration: optional TOML file, overridden by CLI flags.
//!
//! ```toml
//! ws_url = "ws://localhost:8000/ws/notifications/"
//! api_base_url = "http://localhost:8000/api"
//! lookup_timeout_ms = 5000
//!
//! [auth_mode]
//! mode = "query"
//! param = "token"
//!
//! [reconnect]
//! initial_backoff_ms = 500
//! max_backoff_ms = 20000
//! max_attempts = 8
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use huddle_core::{BackoffPolicy, Credential};
use huddle_enrich::{DEFAULT_LOOKUP_TIMEOUT, ResolverConfig};
use huddle_session::{AuthMode, SessionConfig};
use serde::Deserialize;

use crate::cli::Cli;

const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub ws_url: Option<String>,
    pub api_base_url: Option<String>,
    pub token: Option<String>,
    pub auth_mode: AuthMode,
    pub reconnect: ReconnectConfig,
    pub outbound_buffer: usize,
    pub lookup_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            api_base_url: None,
            token: None,
            auth_mode: AuthMode::default(),
            reconnect: ReconnectConfig::default(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            initial_backoff_ms: backoff.initial_ms,
            max_backoff_ms: backoff.max_ms,
            max_attempts: None,
        }
    }
}

impl RuntimeConfig {
    /// Read `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config: loaded");
        Ok(config)
    }

    /// CLI flags (and their env fallbacks) win over the file.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(url) = &cli.ws_url {
            self.ws_url = Some(url.clone());
        }
        if let Some(url) = &cli.api_url {
            self.api_base_url = Some(url.clone());
        }
        if let Some(token) = &cli.token {
            self.token = Some(token.clone());
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.token
            .as_deref()
            .map(Credential::new)
            .filter(Credential::is_valid)
    }

    pub fn require_ws_url(&self) -> anyhow::Result<&str> {
        self.ws_url
            .as_deref()
            .context("no push endpoint configured (set --ws-url or HUDDLE_WS_URL)")
    }

    pub fn require_api_url(&self) -> anyhow::Result<&str> {
        self.api_base_url
            .as_deref()
            .context("no collaborator url configured (set --api-url or HUDDLE_API_URL)")
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            backoff: BackoffPolicy::new(self.reconnect.initial_backoff_ms, self.reconnect.max_backoff_ms),
            max_reconnect_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms.max(1)),
        }
    }
}
