//! `huddle send`: connect, push one frame, disconnect.

use std::time::Duration;

use anyhow::{Context, bail};
use huddle_core::ConnectionState;

use crate::cli::SendOpts;
use crate::config::RuntimeConfig;
use crate::context::{build_session, read_json_arg};

/// Time given to the socket pump to flush the frame after disconnecting.
const FLUSH_GRACE: Duration = Duration::from_millis(200);

/// Entry point for `huddle send`.
pub async fn cmd_send(config: &RuntimeConfig, opts: &SendOpts) -> anyhow::Result<()> {
    let payload = read_json_arg(&opts.payload).context("payload is not valid JSON")?;
    let credential = config
        .credential()
        .context("no token configured (set --token or HUDDLE_TOKEN)")?;
    let session = build_session(config)?;

    let mut states = session.subscribe_state();
    session.set_credential(Some(credential));

    // The borrow returned by `wait_for` must not outlive this statement.
    let connected = matches!(
        tokio::time::timeout(
            Duration::from_secs(opts.timeout),
            states.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await,
        Ok(Ok(_))
    );
    if !connected {
        session.force_disconnect();
        bail!("not connected after {}s", opts.timeout);
    }

    let sent = session.send_message(&payload);
    session.disconnect();
    if !sent {
        bail!("frame was not accepted by the session");
    }
    tokio::time::sleep(FLUSH_GRACE).await;
    tracing::info!("send: frame delivered to transport");
    Ok(())
}
