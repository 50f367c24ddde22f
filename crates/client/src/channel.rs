//! Reconnecting event channel.
//!
//! [`EventChannel`] owns one logical subscription to the server's event
//! stream. It spawns a single connection task (connect -> pump frames
//! -> reconnect), parses every text frame into a [`ServerEvent`] and
//! invokes the handlers registered for that event's kind, in
//! registration order, one frame at a time.
//!
//! Subscriptions live on the channel, not on a connection, so they
//! survive reconnects. Connection lifecycle changes are broadcast as
//! [`ChannelEvent`]s; call [`EventChannel::subscribe`] to receive them.
//!
//! ```no_run
//! use aura_client::channel::EventChannel;
//! use aura_client::messages::CompletedEvent;
//! use aura_client::reconnect::ReconnectPolicy;
//!
//! # async fn demo() {
//! let channel = EventChannel::new("ws://127.0.0.1:47821/ws/progress", ReconnectPolicy::default());
//! channel.on(|done: &CompletedEvent| println!("{} finished", done.filename));
//! channel.connect();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{Connector, Transport, WsConnector};
use crate::events::{ChannelEvent, ConnectionState};
use crate::messages::{parse_message, EventKind, MessageError, ServerEvent, TypedEvent};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTracker};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long [`EventChannel::shutdown`] waits for the connection task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered event handler.
type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Reconnecting, typed publish/subscribe transport for server events.
///
/// Created once per application session and shared as `Arc<EventChannel>`.
pub struct EventChannel {
    endpoint: String,
    connector: Arc<dyn Connector>,
    subscriptions: RwLock<HashMap<EventKind, Vec<Handler>>>,
    session: Mutex<Session>,
    task: Mutex<Option<RunningTask>>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

/// Connection bookkeeping, independent of any job semantics.
struct Session {
    state: ConnectionState,
    tracker: ReconnectTracker,
}

struct RunningTask {
    handle: JoinHandle<()>,
    /// Cancelled for a caller-initiated close.
    cancel: CancellationToken,
}

impl EventChannel {
    /// Create a channel that connects over WebSocket.
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy) -> Arc<Self> {
        Self::with_connector(endpoint, policy, Arc::new(WsConnector::new()))
    }

    /// Create a channel over a custom [`Connector`].
    pub fn with_connector(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            endpoint: endpoint.into(),
            connector,
            subscriptions: RwLock::new(HashMap::new()),
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                tracker: ReconnectTracker::new(policy),
            }),
            task: Mutex::new(None),
            event_tx,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.session).state
    }

    /// Consecutive failed attempts since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.session).tracker.attempts()
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Register `handler` for every event whose payload is `E`.
    ///
    /// Handlers are append-only and survive reconnects. Several handlers
    /// may be registered for one kind; they run in registration order.
    pub fn on<E, F>(&self, handler: F)
    where
        E: TypedEvent,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Handler = Arc::new(move |event: &ServerEvent| {
            if let Some(payload) = E::from_event(event) {
                handler(payload);
            }
        });
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(E::KIND)
            .or_default()
            .push(wrapped);
        tracing::debug!(event = E::KIND.as_str(), "Registered event handler");
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Open the connection unless one is already open or pending.
    ///
    /// Also the explicit restart after the reconnect budget is spent:
    /// the attempt counter starts from zero again.
    pub fn connect(self: &Arc<Self>) {
        let mut task = lock(&self.task);
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() && self.state() != ConnectionState::Exhausted {
                tracing::debug!(endpoint = %self.endpoint, "Connection already open or pending");
                return;
            }
        }

        {
            let mut session = lock(&self.session);
            session.tracker.reset();
            session.state = ConnectionState::Connecting;
        }

        let cancel = CancellationToken::new();
        let channel = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let endpoint = channel.endpoint.clone();
            tracing::info!(%endpoint, "Starting event channel");
            channel.run_connection_loop(token).await;
            tracing::info!(%endpoint, "Event channel task exited");
        });

        *task = Some(RunningTask { handle, cancel });
    }

    /// Close the connection from our side. No reconnect follows.
    ///
    /// Waits up to 5 seconds for the connection task to exit.
    pub async fn shutdown(&self) {
        let running = lock(&self.task).take();
        if let Some(running) = running {
            running.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, running.handle)
                .await
                .is_err()
            {
                tracing::warn!(endpoint = %self.endpoint, "Event channel task did not stop in time");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Parse one raw frame and dispatch it to the matching handlers.
    ///
    /// Malformed frames are logged and dropped. Returns the number of
    /// handlers invoked.
    pub fn deliver(&self, text: &str) -> usize {
        let event = match parse_message(text) {
            Ok(event) => event,
            Err(MessageError::UnknownEvent(name)) => {
                tracing::debug!(event = %name, "Ignoring unknown event");
                return 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Dropping malformed event frame");
                return 0;
            }
        };

        // Clone out of the lock so a handler may register further handlers.
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        tracing::debug!(
            event = event.kind().as_str(),
            job_id = event.job_id().unwrap_or("-"),
            handlers = handlers.len(),
            "Dispatching event",
        );

        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    // ---- private helpers ----

    /// Core connection loop: connect -> pump frames -> reconnect.
    ///
    /// Runs until the caller cancels or the reconnect budget is spent.
    async fn run_connection_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.set_state(ConnectionState::Connecting);
            self.notify(ChannelEvent::Connecting);

            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.connector.connect(&self.endpoint) => Some(result),
            };
            let Some(result) = result else { break };

            match result {
                Ok(mut transport) => {
                    {
                        let mut session = lock(&self.session);
                        session.tracker.reset();
                        session.state = ConnectionState::Connected;
                    }
                    self.notify(ChannelEvent::Connected);

                    if self.pump(transport.as_mut(), &cancel).await {
                        transport.close().await;
                        break;
                    }
                    tracing::warn!(endpoint = %self.endpoint, "Event stream connection lost");
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Connection attempt failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            self.notify(ChannelEvent::Disconnected);

            let decision = lock(&self.session).tracker.record_closure();
            match decision {
                ReconnectDecision::Retry { attempt, delay } => {
                    tracing::info!(
                        endpoint = %self.endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting to event stream",
                    );
                    self.notify(ChannelEvent::ReconnectScheduled {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });

                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        break;
                    }
                }
                ReconnectDecision::Exhausted { attempts } => {
                    tracing::error!(
                        endpoint = %self.endpoint,
                        attempts,
                        "Max reconnect attempts reached, giving up",
                    );
                    self.set_state(ConnectionState::Exhausted);
                    self.notify(ChannelEvent::Exhausted { attempts });
                    return;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.notify(ChannelEvent::Closed);
    }

    /// Deliver frames until the connection drops.
    ///
    /// Returns `true` when the caller cancelled, `false` when the
    /// connection was lost.
    async fn pump(&self, transport: &mut dyn Transport, cancel: &CancellationToken) -> bool {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return true,
                frame = transport.next_text() => frame,
            };
            match frame {
                Some(text) => {
                    self.deliver(&text);
                }
                None => return false,
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut session = lock(&self.session);
        if session.state != state {
            tracing::debug!(from = %session.state, to = %state, "Connection state changed");
            session.state = state;
        }
    }

    fn notify(&self, event: ChannelEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::client::ClientError;
    use crate::messages::{CompletedEvent, ProgressEvent, StatusChangeEvent};

    /// Connector that never connects; dispatch tests don't need one.
    struct NoopConnector;

    #[async_trait]
    impl Connector for NoopConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Box<dyn Transport>, ClientError> {
            Err(ClientError::Connection("offline".into()))
        }
    }

    /// Connector whose connections stay open until closed.
    struct HoldingConnector {
        calls: AtomicUsize,
    }

    struct HoldingTransport;

    #[async_trait]
    impl Transport for HoldingTransport {
        async fn next_text(&mut self) -> Option<String> {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Connector for HoldingConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Box<dyn Transport>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HoldingTransport))
        }
    }

    fn offline_channel() -> Arc<EventChannel> {
        EventChannel::with_connector(
            "ws://test/ws/progress",
            ReconnectPolicy::default(),
            Arc::new(NoopConnector),
        )
    }

    const COMPLETED: &str = r#"{"event":"completed","job_id":"j-1","filename":"a.mp3"}"#;

    #[test]
    fn handlers_run_in_registration_order() {
        let channel = offline_channel();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            channel.on(move |_: &CompletedEvent| log.lock().unwrap().push(tag));
        }

        assert_eq!(channel.deliver(COMPLETED), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let channel = offline_channel();
        let progress_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&progress_calls);
        channel.on(move |_: &ProgressEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(channel.deliver(COMPLETED), 0);
        assert_eq!(progress_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.handler_count(EventKind::Progress), 1);
        assert_eq!(channel.handler_count(EventKind::Completed), 0);
    }

    #[test]
    fn duplicate_frames_are_delivered_twice() {
        let channel = offline_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        channel.on(move |_: &CompletedEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.deliver(COMPLETED);
        channel.deliver(COMPLETED);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn malformed_frames_never_reach_handlers() {
        let channel = offline_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&calls);
        channel.on(move |_: &CompletedEvent| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&calls);
        channel.on(move |_: &StatusChangeEvent| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        for frame in [
            "",
            "{not json",
            "42",
            r#"{"job_id":"j-1","filename":"a.mp3"}"#,
            r#"{"event":null}"#,
            r#"{"event":"completed"}"#,
            r#"{"event":"status_change","job_id":"j","status":"melting"}"#,
            r#"{"event":"something_new","job_id":"j"}"#,
        ] {
            assert_eq!(channel.deliver(frame), 0, "frame {frame:?} was dispatched");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_register_another_handler() {
        let channel = offline_channel();
        let inner = Arc::clone(&channel);
        channel.on(move |_: &CompletedEvent| {
            inner.on(|_: &ProgressEvent| {});
        });

        channel.deliver(COMPLETED);
        assert_eq!(channel.handler_count(EventKind::Progress), 1);
    }

    #[test]
    fn new_channel_starts_disconnected() {
        let channel = offline_channel();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.reconnect_attempts(), 0);
        assert_eq!(channel.endpoint(), "ws://test/ws/progress");
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_open() {
        let connector = Arc::new(HoldingConnector {
            calls: AtomicUsize::new(0),
        });
        let channel = EventChannel::with_connector(
            "ws://test/ws/progress",
            ReconnectPolicy::default(),
            connector.clone(),
        );
        let mut events = channel.subscribe();

        channel.connect();
        loop {
            if events.recv().await.unwrap() == ChannelEvent::Connected {
                break;
            }
        }
        channel.connect();
        channel.connect();
        tokio::task::yield_now().await;

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.state(), ConnectionState::Connected);

        channel.shutdown().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
