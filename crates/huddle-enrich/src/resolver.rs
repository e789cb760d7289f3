//! Notification entity resolver.
//!
//! Every foreign key in a notification payload is looked up concurrently and
//! independently. A successful lookup adds a `*_name` key next to the id; a
//! failed one leaves the payload untouched and is recorded as the snapshot's
//! error. Original keys are never rewritten.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use huddle_core::{Lookup, plan_lookups};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::directory::{EntityDirectory, display_name};
use crate::error::LookupError;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound for a single collaborator read.
    pub lookup_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

// ─── Snapshot ─────────────────────────────────────────────────────

/// State of one enrichment run as seen by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSnapshot {
    /// Payload as received.
    pub raw: Map<String, Value>,
    /// `raw` plus every display name resolved so far.
    pub enriched: Map<String, Value>,
    /// Lookups still in flight.
    pub pending: usize,
    /// Most recent lookup failure, if any.
    pub error: Option<LookupError>,
    /// Id fields whose lookup failed.
    pub failed_fields: Vec<&'static str>,
}

impl EnrichmentSnapshot {
    fn start(raw: Map<String, Value>, pending: usize) -> Self {
        Self {
            enriched: raw.clone(),
            raw,
            pending,
            error: None,
            failed_fields: Vec::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }

    /// The raw payload while lookups are outstanding, the enriched one after.
    pub fn display_payload(&self) -> &Map<String, Value> {
        if self.is_loading() { &self.raw } else { &self.enriched }
    }

    /// Keys added by enrichment, in payload order.
    pub fn added_keys(&self) -> Vec<&str> {
        self.enriched
            .keys()
            .filter(|k| !self.raw.contains_key(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn apply(&mut self, lookup: Lookup, result: Result<String, LookupError>) {
        self.pending = self.pending.saturating_sub(1);
        match result {
            Ok(name) => {
                self.enriched.entry(lookup.name_key).or_insert(Value::String(name));
            }
            Err(e) => {
                tracing::debug!(
                    field = lookup.field,
                    id = %lookup.id,
                    error = %e,
                    "resolver: lookup failed"
                );
                self.failed_fields.push(lookup.field);
                self.error = Some(e);
            }
        }
    }
}

// ─── Resolver ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct NotificationResolver {
    directory: Arc<dyn EntityDirectory>,
    config: ResolverConfig,
}

impl NotificationResolver {
    pub fn new(directory: Arc<dyn EntityDirectory>, config: ResolverConfig) -> Self {
        Self { directory, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve every foreign key in `payload` and return the final snapshot.
    pub async fn enrich(&self, payload: &Map<String, Value>) -> EnrichmentSnapshot {
        let lookups = plan_lookups(payload);
        let (tx, _rx) = watch::channel(EnrichmentSnapshot::start(payload.clone(), lookups.len()));
        self.run(lookups, &tx).await
    }

    /// Start enrichment in the background. The receiver first holds a
    /// loading snapshot and sees a new one after every completed lookup.
    /// Dropping the receiver discards the results.
    pub fn spawn_enrich(&self, payload: Map<String, Value>) -> watch::Receiver<EnrichmentSnapshot> {
        let lookups = plan_lookups(&payload);
        let (tx, rx) = watch::channel(EnrichmentSnapshot::start(payload, lookups.len()));
        if lookups.is_empty() {
            return rx;
        }

        let resolver = self.clone();
        tokio::spawn(async move {
            let done = resolver.run(lookups, &tx).await;
            if tx.is_closed() {
                tracing::debug!(
                    resolved = done.added_keys().len(),
                    "resolver: no receivers, result discarded"
                );
            }
        });
        rx
    }

    async fn run(
        &self,
        lookups: Vec<Lookup>,
        tx: &watch::Sender<EnrichmentSnapshot>,
    ) -> EnrichmentSnapshot {
        let mut snapshot = tx.borrow().clone();
        let timeout = self.config.lookup_timeout;

        let mut in_flight: FuturesUnordered<_> = lookups
            .into_iter()
            .map(|lookup| {
                let directory = Arc::clone(&self.directory);
                async move {
                    let result =
                        tokio::time::timeout(timeout, display_name(directory.as_ref(), lookup.kind, &lookup.id))
                            .await
                            .unwrap_or_else(|_| {
                                Err(LookupError::Timeout {
                                    kind: lookup.kind,
                                    id: lookup.id.clone(),
                                    after_ms: timeout.as_millis() as u64,
                                })
                            });
                    (lookup, result)
                }
            })
            .collect();

        while let Some((lookup, result)) = in_flight.next().await {
            snapshot.apply(lookup, result);
            tx.send_replace(snapshot.clone());
        }
        snapshot
    }
}
