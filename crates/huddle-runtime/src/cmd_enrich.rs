//! `huddle enrich`: one-shot enrichment of a notification payload.

use anyhow::{Context, bail};
use serde_json::Value;

use crate::cli::EnrichOpts;
use crate::config::RuntimeConfig;
use crate::context::{build_resolver, read_json_arg};

/// Entry point for `huddle enrich`.
pub async fn cmd_enrich(config: &RuntimeConfig, opts: &EnrichOpts) -> anyhow::Result<()> {
    let payload = match read_json_arg(&opts.payload).context("payload is not valid JSON")? {
        Value::Object(map) => map,
        other => bail!("payload must be a JSON object, got {}", json_kind(&other)),
    };
    let resolver = build_resolver(config)?;

    let done = resolver.enrich(&payload).await;
    println!("{}", serde_json::to_string_pretty(done.display_payload())?);
    if let Some(error) = &done.error {
        eprintln!(
            "warning: {} lookup(s) failed ({}): {error}",
            done.failed_fields.len(),
            done.failed_fields.join(", ")
        );
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
