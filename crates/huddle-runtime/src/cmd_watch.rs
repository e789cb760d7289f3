//! `huddle watch`: live stream of session state, task progress and enriched
//! notifications as JSON lines.

use anyhow::Context;
use huddle_core::{ConnectionState, Message, TaskProgressRecord};
use huddle_enrich::{EnrichmentSnapshot, NotificationResolver};
use huddle_session::SessionManager;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::WatchOpts;
use crate::config::RuntimeConfig;
use crate::context::{build_resolver, build_session, emit};

/// Entry point for `huddle watch`.
pub async fn cmd_watch(config: &RuntimeConfig, opts: &WatchOpts) -> anyhow::Result<()> {
    let credential = config
        .credential()
        .context("no token configured (set --token or HUDDLE_TOKEN)")?;
    let session = build_session(config)?;
    // Without collaborators notifications are printed as received.
    let resolver = match build_resolver(config) {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            tracing::warn!(error = %e, "watch: notification enrichment disabled");
            None
        }
    };

    let mut states = session.subscribe_state();
    let mut messages = session.dispatcher().subscribe();
    let logout = session.logout_hook();
    session.set_credential(Some(credential));

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                emit(&state_line(state, session.reconnect_attempts()));
            }
            received = messages.recv() => match received {
                Ok(message) => on_message(&session, resolver.as_ref(), &message, opts),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch: output lagging, messages skipped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                logout.trigger();
                emit(&state_line(session.state(), session.reconnect_attempts()));
                break;
            }
        }
    }

    Ok(())
}

fn on_message(
    session: &SessionManager,
    resolver: Option<&NotificationResolver>,
    message: &Message,
    opts: &WatchOpts,
) {
    match message {
        Message::TaskProgress(update) => {
            if let Some(record) = progress_for(session, &update.task_id, opts.task.as_deref()) {
                emit(&progress_line(&record));
            }
        }
        Message::Notification(notification) => match resolver {
            Some(resolver) => {
                let mut rx = resolver.spawn_enrich(notification.payload.clone());
                tokio::spawn(async move {
                    if let Ok(done) = rx.wait_for(|s| !s.is_loading()).await {
                        emit(&notification_line(&done));
                    }
                });
            }
            None => emit(&json!({"event": "notification", "payload": notification.payload})),
        },
        Message::Other { kind, .. } => {
            tracing::debug!(kind = %kind, "watch: ignoring message");
        }
    }
}

/// Record to print for an update of `task_id`. With an expected id the
/// current progress for that id is printed instead.
fn progress_for(
    session: &SessionManager,
    task_id: &str,
    expected: Option<&str>,
) -> Option<TaskProgressRecord> {
    let tracker = session.task_progress();
    match expected {
        Some(expected) => tracker.get_current_task_progress(expected),
        None => tracker.get_task_progress(task_id),
    }
}

fn state_line(state: ConnectionState, reconnect_attempts: u32) -> Value {
    json!({
        "event": "state",
        "state": state,
        "reconnect_attempts": reconnect_attempts,
    })
}

fn progress_line(record: &TaskProgressRecord) -> Value {
    json!({"event": "task_progress", "record": record})
}

fn notification_line(snapshot: &EnrichmentSnapshot) -> Value {
    let mut line = json!({
        "event": "notification",
        "payload": snapshot.display_payload(),
    });
    if let Some(error) = &snapshot.error {
        line["error"] = json!(error.to_string());
        line["failed_fields"] = json!(snapshot.failed_fields);
    }
    line
}
