//! Session manager: owns the single push connection of an authenticated
//! session.
//!
//! One `SessionManager` is constructed per session and handed to consumers
//! by clone. It opens the transport when a credential is available, keeps it
//! alive across unexpected closes with capped exponential backoff, and tears
//! it down on credential loss, `disconnect()` or logout.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!      ▲                                              │ close/error
//!      │ disconnect() / credential lost / give up     ▼
//!      └──────────────────────────────────────── Reconnecting ──open──▶ Connected
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use huddle_core::{BackoffPolicy, ConnectionState, Credential};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::progress::TaskProgressTracker;
use crate::transport::{Connector, LinkEvent, TransportError};

/// Consecutive failures after which reconnect errors drop to debug level.
const DEBUG_LOG_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backoff: BackoffPolicy,
    /// Give up after this many consecutive failed reconnects. `None` retries
    /// until the credential goes away.
    pub max_reconnect_attempts: Option<u32>,
}

/// Cloneable handle to the session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    dispatcher: Dispatcher,
    tracker: TaskProgressTracker,
    shared: Mutex<Shared>,
    /// Held while a frame is dispatched. Logout takes it before clearing so
    /// no in-flight frame lands after the clear.
    dispatch_gate: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Mutable session attributes. Guards are checked and set under one lock so
/// concurrent `connect()` calls start at most one connection task.
#[derive(Default)]
struct Shared {
    credential: Option<Credential>,
    /// Set when a connection task is started; cleared on teardown.
    has_connected: bool,
    outbound: Option<mpsc::Sender<String>>,
    reconnect_attempts: u32,
    cancel: Option<CancellationToken>,
    /// Bumped on every start and teardown; stale tasks compare against it.
    generation: u64,
    /// Thread currently inside `dispatch_frame`, if any.
    dispatching: Option<ThreadId>,
}

enum LinkEnd {
    Cancelled,
    Closed(Option<String>),
    Failed(TransportError),
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Dispatcher::new();
        let tracker = TaskProgressTracker::new();
        tracker.attach(&dispatcher);

        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                dispatcher,
                tracker,
                shared: Mutex::new(Shared::default()),
                dispatch_gate: Mutex::new(()),
                state_tx,
            }),
        }
    }

    /// Store a credential without connecting yet.
    pub fn with_credential(self, credential: Credential) -> Self {
        if credential.is_valid() {
            self.inner.lock().credential = Some(credential);
        }
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn task_progress(&self) -> &TaskProgressTracker {
        &self.inner.tracker
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    pub fn has_credential(&self) -> bool {
        self.inner.lock().credential.is_some()
    }

    /// Apply a credential change: a valid token connects, `None` (or a blank
    /// token) disconnects. A replaced token is used from the next open.
    pub fn set_credential(&self, credential: Option<Credential>) {
        match credential.filter(Credential::is_valid) {
            Some(credential) => {
                self.inner.lock().credential = Some(credential);
                self.connect();
            }
            None => {
                let had = self.inner.lock().credential.take().is_some();
                if had {
                    tracing::info!("session: credential removed");
                }
                self.disconnect();
            }
        }
    }

    /// Follow an external credential source until it closes.
    pub fn follow_credentials(
        &self,
        mut credentials: watch::Receiver<Option<Credential>>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut current = credentials.borrow_and_update().clone();
            loop {
                let Some(inner) = weak.upgrade() else { return };
                SessionManager { inner }.set_credential(current);
                if credentials.changed().await.is_err() {
                    return;
                }
                current = credentials.borrow_and_update().clone();
            }
        })
    }

    /// Start the connection if a credential is present and nothing is
    /// already connecting or connected. Returns whether a new attempt began.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> bool {
        let mut shared = self.inner.lock();

        if shared.credential.is_none() {
            tracing::debug!("session: connect skipped, no credential");
            return false;
        }
        let link_open = shared.outbound.as_ref().is_some_and(|tx| !tx.is_closed());
        if shared.has_connected || link_open {
            tracing::debug!(state = %self.state(), "session: connect skipped, already active");
            return false;
        }

        shared.has_connected = true;
        shared.reconnect_attempts = 0;
        shared.generation += 1;
        let generation = shared.generation;
        let cancel = CancellationToken::new();
        shared.cancel = Some(cancel.clone());
        self.inner.set_state(ConnectionState::Connecting);
        drop(shared);

        tracing::info!(generation, "session: connecting");
        tokio::spawn(Inner::run(Arc::downgrade(&self.inner), generation, cancel));
        true
    }

    /// Close the connection. The credential and received state are kept, so
    /// a later `connect()` resumes the session.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        if self.inner.teardown(&mut shared) {
            tracing::info!("session: disconnected");
        }
    }

    /// Logout teardown. Synchronously cancels any pending open or backoff,
    /// drops the credential and clears everything received this session so
    /// the next session starts clean.
    pub fn force_disconnect(&self) {
        let reentrant = {
            let mut shared = self.inner.lock();
            self.inner.teardown(&mut shared);
            shared.credential = None;
            shared.dispatching == Some(thread::current().id())
        };
        // Called from a message handler: the gate is already ours. The
        // tracker handler runs first, so the current frame is cleared too.
        let _gate = (!reentrant).then(|| self.inner.dispatch_gate());
        self.inner.dispatcher.reset();
        self.inner.tracker.clear();
        tracing::info!("session: forced disconnect");
    }

    /// Send one JSON frame. Fire-and-forget: returns `false` without queuing
    /// when not connected or when the outbound queue is full.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "session: outbound payload not serializable");
                return false;
            }
        };

        let shared = self.inner.lock();
        if !self.state().is_connected() {
            tracing::debug!(state = %self.state(), "session: send skipped, not connected");
            return false;
        }
        let Some(outbound) = shared.outbound.as_ref() else {
            return false;
        };
        match outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("session: outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("session: link closed, dropping message");
                false
            }
        }
    }

    /// Callback that performs [`force_disconnect`](Self::force_disconnect)
    /// without holding the session alive.
    pub fn logout_hook(&self) -> LogoutHook {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        LogoutHook::new(move || {
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.force_disconnect();
            }
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch_gate(&self) -> MutexGuard<'_, ()> {
        self.dispatch_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatch one frame unless the task is stale. Teardown bumps the
    /// generation first, so a frame checked here either completes before
    /// the logout clear or is never dispatched.
    fn deliver(&self, generation: u64, text: &str) -> bool {
        let _gate = self.dispatch_gate();
        {
            let mut shared = self.lock();
            if shared.generation != generation {
                return false;
            }
            shared.dispatching = Some(thread::current().id());
        }
        self.dispatcher.dispatch_frame(text);
        self.lock().dispatching = None;
        true
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "session: state changed");
        }
    }

    /// Reset connection attributes and publish `Disconnected`. Returns
    /// whether anything was active.
    fn teardown(&self, shared: &mut Shared) -> bool {
        let was_active = shared.has_connected || shared.outbound.is_some();
        if let Some(cancel) = shared.cancel.take() {
            cancel.cancel();
        }
        shared.outbound = None;
        shared.has_connected = false;
        shared.reconnect_attempts = 0;
        shared.generation += 1;
        self.set_state(ConnectionState::Disconnected);
        was_active
    }

    fn credential_for(&self, generation: u64) -> Option<Credential> {
        let shared = self.lock();
        if shared.generation != generation {
            return None;
        }
        shared.credential.clone()
    }

    /// Record a successful open. `false` means the task is stale.
    fn on_open(&self, generation: u64, outbound: mpsc::Sender<String>) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        shared.outbound = Some(outbound);
        shared.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connected);
        true
    }

    /// Decide whether to retry after the link ended or failed to open.
    /// Returns the attempt number to back off for.
    fn begin_retry(&self, generation: u64) -> Option<u32> {
        let mut shared = self.lock();
        if shared.generation != generation {
            return None;
        }
        shared.outbound = None;

        if shared.credential.is_none() {
            self.teardown(&mut shared);
            return None;
        }

        shared.reconnect_attempts = shared.reconnect_attempts.saturating_add(1);
        let attempt = shared.reconnect_attempts;
        if let Some(max) = self.config.max_reconnect_attempts {
            if attempt > max {
                tracing::warn!(attempts = attempt - 1, "session: giving up reconnecting");
                self.teardown(&mut shared);
                return None;
            }
        }

        self.set_state(ConnectionState::Reconnecting);
        Some(attempt)
    }

    /// Connection task. Holds the session weakly so it ends once every
    /// handle is gone.
    async fn run(weak: Weak<Self>, generation: u64, cancel: CancellationToken) {
        loop {
            let (connector, credential) = {
                let Some(inner) = weak.upgrade() else { return };
                let Some(credential) = inner.credential_for(generation) else {
                    return;
                };
                (Arc::clone(&inner.connector), credential)
            };

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = connector.open(&credential) => result,
            };

            match opened {
                Ok(link) => {
                    let Some(inner) = weak.upgrade() else { return };
                    if !inner.on_open(generation, link.outbound.clone()) {
                        return;
                    }
                    drop(inner);
                    tracing::info!(generation, "session: connected");

                    match Self::read_link(&weak, generation, link.inbound, &cancel).await {
                        LinkEnd::Cancelled => return,
                        LinkEnd::Closed(reason) => {
                            tracing::info!(reason = ?reason, "session: connection closed");
                        }
                        LinkEnd::Failed(e) => {
                            tracing::warn!(error = %e, "session: connection lost");
                        }
                    }
                }
                Err(e) => {
                    let Some(inner) = weak.upgrade() else { return };
                    let failures = inner.lock().reconnect_attempts.saturating_add(1);
                    if failures >= DEBUG_LOG_THRESHOLD {
                        tracing::debug!(failures, "session: connect error: {e}");
                    } else {
                        tracing::warn!(failures, "session: connect error: {e}");
                    }
                }
            }

            let (attempt, delay) = {
                let Some(inner) = weak.upgrade() else { return };
                let Some(attempt) = inner.begin_retry(generation) else {
                    return;
                };
                (attempt, inner.config.backoff.delay(attempt))
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("session: cancelled during retry backoff");
                    return;
                }
                _ = tokio::time::sleep(delay) => {
                    tracing::info!(
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        "session: reconnecting..."
                    );
                }
            }
        }
    }

    /// Feed inbound frames to the dispatcher until the link ends.
    async fn read_link(
        weak: &Weak<Self>,
        generation: u64,
        mut inbound: mpsc::Receiver<LinkEvent>,
        cancel: &CancellationToken,
    ) -> LinkEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return LinkEnd::Cancelled,
                event = inbound.recv() => event,
            };
            match event {
                Some(LinkEvent::Frame(text)) => {
                    let Some(inner) = weak.upgrade() else {
                        return LinkEnd::Cancelled;
                    };
                    if !inner.deliver(generation, &text) {
                        return LinkEnd::Cancelled;
                    }
                }
                Some(LinkEvent::Closed { reason }) => return LinkEnd::Closed(reason),
                Some(LinkEvent::Failed(e)) => return LinkEnd::Failed(e),
                None => return LinkEnd::Closed(None),
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = shared.cancel.take() {
            cancel.cancel();
        }
    }
}

// ─── Logout hook ──────────────────────────────────────────────────

/// Injected teardown callback for code that must end the session on logout
/// without holding a `SessionManager`.
#[derive(Clone)]
pub struct LogoutHook {
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl LogoutHook {
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn trigger(&self) {
        (self.callback)();
    }
}

impl std::fmt::Debug for LogoutHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogoutHook")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Link;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Server side of an in-memory link.
    struct RemoteEnd {
        events: mpsc::Sender<LinkEvent>,
        received: mpsc::Receiver<String>,
    }

    struct TestConnector {
        opens: AtomicUsize,
        fail: AtomicBool,
        remotes: mpsc::UnboundedSender<RemoteEnd>,
    }

    #[async_trait]
    impl Connector for TestConnector {
        async fn open(&self, _credential: &Credential) -> Result<Link, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".into()));
            }
            let (events_tx, events_rx) = mpsc::channel(16);
            let (out_tx, out_rx) = mpsc::channel(2);
            let _ = self.remotes.send(RemoteEnd {
                events: events_tx,
                received: out_rx,
            });
            Ok(Link {
                outbound: out_tx,
                inbound: events_rx,
            })
        }
    }

    fn harness(
        config: SessionConfig,
    ) -> (SessionManager, Arc<TestConnector>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(TestConnector {
            opens: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            remotes,
        });
        let session = SessionManager::new(connector.clone(), config);
        (session, connector, remote_rx)
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            backoff: BackoffPolicy::new(100, 400),
            max_reconnect_attempts: None,
        }
    }

    async fn wait_for(session: &SessionManager, want: ConnectionState) {
        let mut rx = session.subscribe_state();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == want))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connects_open_once() {
        let (session, connector, _remotes) = harness(fast_config());
        let session = session.with_credential(Credential::new("tok"));
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = session.clone();
            handles.push(tokio::spawn(async move { s.connect() }));
        }
        let started: usize = futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| usize::from(r.unwrap()))
            .sum();

        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(started, 1);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert!(!session.connect());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_without_credential_is_noop() {
        let (session, connector, _remotes) = harness(fast_config());
        assert!(!session.connect());
        session.set_credential(Some(Credential::new("  ")));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        tokio::task::yield_now().await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inbound_frames_reach_progress_tracker() {
        let (session, _connector, mut remotes) = harness(fast_config());
        let mut messages = session.dispatcher().subscribe();
        session.set_credential(Some(Credential::new("tok")));
        let remote = remotes.recv().await.unwrap();

        remote
            .events
            .send(LinkEvent::Frame("garbage".into()))
            .await
            .unwrap();
        remote
            .events
            .send(LinkEvent::Frame(
                r#"{"type":"task_progress","data":{"task_id":"t1_9999","progress":60}}"#.into(),
            ))
            .await
            .unwrap();

        let msg = messages.recv().await.unwrap();
        assert_eq!(msg.kind(), "task_progress");
        assert!(session.is_connected(), "malformed frame must not disconnect");
        assert_eq!(session.dispatcher().dropped(), 1);
        let rec = session.task_progress().get_current_task_progress("t1").unwrap();
        assert_eq!(rec.progress, Some(60.0));
    }

    #[tokio::test]
    async fn send_message_only_when_connected() {
        let (session, _connector, mut remotes) = harness(fast_config());
        assert!(!session.send_message(&serde_json::json!({"type": "ping"})));

        session.set_credential(Some(Credential::new("tok")));
        let mut remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        assert!(session.send_message(&serde_json::json!({"type": "ping"})));
        assert_eq!(remote.received.recv().await.unwrap(), r#"{"type":"ping"}"#);

        // Outbound queue holds two frames; the third is dropped, not buffered.
        assert!(session.send_message("a"));
        assert!(session.send_message("b"));
        assert!(!session.send_message("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_and_resets_attempts() {
        let (session, connector, mut remotes) = harness(fast_config());
        session.set_credential(Some(Credential::new("tok")));
        let first = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let mut states = session.subscribe_state();
        first
            .events
            .send(LinkEvent::Closed {
                reason: Some("server restart".into()),
            })
            .await
            .unwrap();

        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();
        assert_eq!(session.reconnect_attempts(), 1);
        assert!(!session.send_message("dropped while reconnecting"));

        let _second = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert_eq!(session.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn force_disconnect_cancels_pending_backoff() {
        let (session, connector, _remotes) = harness(SessionConfig {
            backoff: BackoffPolicy::new(5_000, 5_000),
            max_reconnect_attempts: None,
        });
        connector.fail.store(true, Ordering::SeqCst);
        session.set_credential(Some(Credential::new("tok")));
        wait_for(&session, ConnectionState::Reconnecting).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);

        session.force_disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.has_credential());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (session, connector, _remotes) = harness(SessionConfig {
            backoff: BackoffPolicy::new(100, 100),
            max_reconnect_attempts: Some(2),
        });
        connector.fail.store(true, Ordering::SeqCst);
        let mut states = session.subscribe_state();
        session.set_credential(Some(Credential::new("tok")));

        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 3);

        // Guard is cleared, so a later connect starts over.
        connector.fail.store(false, Ordering::SeqCst);
        assert!(session.connect());
        wait_for(&session, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn credential_loss_disconnects() {
        let (session, _connector, mut remotes) = harness(fast_config());
        session.set_credential(Some(Credential::new("tok")));
        let _remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        session.set_credential(None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.connect());
    }

    #[tokio::test]
    async fn logout_hook_resets_session() {
        let (session, _connector, mut remotes) = harness(fast_config());
        let hook = session.logout_hook();
        session.set_credential(Some(Credential::new("tok")));
        let remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let mut messages = session.dispatcher().subscribe();
        remote
            .events
            .send(LinkEvent::Frame(
                r#"{"type":"task_progress","data":{"task_id":"t1","progress":5}}"#.into(),
            ))
            .await
            .unwrap();
        messages.recv().await.unwrap();
        assert_eq!(session.task_progress().len(), 1);

        hook.trigger();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.task_progress().is_empty());
        assert!(session.dispatcher().last_message().is_none());
        assert!(!session.connect(), "no credential after logout");

        // A new user on the same handle starts cleanly.
        session.set_credential(Some(Credential::new("other-user")));
        let _remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn logout_hook_outliving_session_is_harmless() {
        let (session, _connector, _remotes) = harness(fast_config());
        let hook = session.logout_hook();
        drop(session);
        hook.trigger();
    }

    #[tokio::test]
    async fn follows_external_credential_source() {
        let (session, _connector, mut remotes) = harness(fast_config());
        let (cred_tx, cred_rx) = watch::channel(None);
        let _task = session.follow_credentials(cred_rx);

        cred_tx.send_replace(Some(Credential::new("tok")));
        let _remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        cred_tx.send_replace(None);
        wait_for(&session, ConnectionState::Disconnected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_reconnects_and_resets_attempts() {
        let (session, connector, mut remotes) = harness(fast_config());
        session.set_credential(Some(Credential::new("tok")));
        let first = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        let mut states = session.subscribe_state();
        first
            .events
            .send(LinkEvent::Failed(TransportError::Closed(
                "connection reset by peer".into(),
            )))
            .await
            .unwrap();

        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();
        assert_eq!(session.reconnect_attempts(), 1);

        let _second = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert_eq!(session.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_backoff_still_waits_between_retries() {
        let (session, connector, _remotes) = harness(SessionConfig {
            backoff: BackoffPolicy::new(0, 0),
            max_reconnect_attempts: None,
        });
        connector.fail.store(true, Ordering::SeqCst);
        session.set_credential(Some(Credential::new("tok")));

        // Busy yielding keeps the paused clock where it is.
        for _ in 0..2_000 {
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(4 * huddle_core::MIN_BACKOFF_MS)).await;
        assert!(connector.opens.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn force_disconnect_under_load_leaves_nothing_behind() {
        let (session, _connector, mut remotes) = harness(fast_config());

        for round in 0..50 {
            session.set_credential(Some(Credential::new("tok")));
            let remote = remotes.recv().await.unwrap();
            wait_for(&session, ConnectionState::Connected).await;

            let events = remote.events.clone();
            let flood = tokio::spawn(async move {
                for i in 0u64.. {
                    let frame = format!(
                        r#"{{"type":"task_progress","data":{{"task_id":"r{round}_{i}","progress":1}}}}"#
                    );
                    if events.send(LinkEvent::Frame(frame)).await.is_err() {
                        break;
                    }
                }
            });
            while session.task_progress().len() < 20 {
                tokio::task::yield_now().await;
            }

            session.force_disconnect();
            assert!(session.task_progress().is_empty(), "round {round}");
            assert!(session.dispatcher().last_message().is_none(), "round {round}");

            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(session.task_progress().is_empty(), "round {round}: late frame");
            assert!(session.dispatcher().last_message().is_none(), "round {round}: late frame");

            flood.await.unwrap();
        }
    }

    #[tokio::test]
    async fn handler_may_log_out_mid_dispatch() {
        let (session, _connector, mut remotes) = harness(fast_config());
        let hook = session.logout_hook();
        session.dispatcher().on_message(move |_| hook.trigger());
        let mut messages = session.dispatcher().subscribe();

        session.set_credential(Some(Credential::new("tok")));
        let remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;
        remote
            .events
            .send(LinkEvent::Frame(
                r#"{"type":"task_progress","data":{"task_id":"t1","progress":5}}"#.into(),
            ))
            .await
            .unwrap();

        messages.recv().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.task_progress().is_empty());
        assert!(session.dispatcher().last_message().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_reconnecting() {
        let (session, connector, _remotes) = harness(fast_config());
        connector.fail.store(true, Ordering::SeqCst);
        session.set_credential(Some(Credential::new("tok")));
        wait_for(&session, ConnectionState::Reconnecting).await;
        let opens = connector.opens.load(Ordering::SeqCst);

        drop(session);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), opens);
    }

    #[tokio::test]
    async fn dropping_every_handle_closes_the_link() {
        let (session, _connector, mut remotes) = harness(fast_config());
        session.set_credential(Some(Credential::new("tok")));
        let mut remote = remotes.recv().await.unwrap();
        wait_for(&session, ConnectionState::Connected).await;

        drop(session);
        let closed = tokio::time::timeout(Duration::from_secs(5), remote.received.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }
}
