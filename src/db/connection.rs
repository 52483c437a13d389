//! Store connection supervision
//!
//! `ConnectionManager` owns the link to the document store: a bounded retry
//! loop at startup, a broadcast stream of later topology events, and an
//! idempotent `close()`. The concrete store sits behind `StoreConnector` so
//! the retry and teardown logic can be exercised without a server.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::types::{MarqueeError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

/// Connection events observed after the initial connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    Disconnected,
    Reconnected,
}

struct SinkInner {
    state: Mutex<ConnectionState>,
    sender: Mutex<Option<broadcast::Sender<ConnectionEvent>>>,
}

/// Receives topology events from the driver, logs them, tracks state and
/// fans them out to subscribers.
///
/// Emitting is synchronous so it can be called from driver callbacks.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SinkInner {
                state: Mutex::new(ConnectionState::Disconnected),
                sender: Mutex::new(Some(sender)),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Set state unless already closed. Returns false once closed.
    pub(crate) fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = next;
        true
    }

    pub fn emit(&self, event: ConnectionEvent) {
        let next = match &event {
            ConnectionEvent::Error(_) => None,
            // The driver keeps reconnecting in the background
            ConnectionEvent::Disconnected => Some(ConnectionState::Reconnecting),
            ConnectionEvent::Reconnected => Some(ConnectionState::Connected),
        };

        // Startup attempts report through the retry loop instead
        if matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Connecting
        ) {
            return;
        }
        if let Some(next) = next {
            if !self.set_state(next) {
                return;
            }
        }

        match &event {
            ConnectionEvent::Error(msg) => error!(error = %msg, "Store connection error"),
            ConnectionEvent::Disconnected => warn!("Store disconnected"),
            ConnectionEvent::Reconnected => info!("Store reconnected"),
        }

        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = sender.as_ref() {
            // No subscribers is fine
            let _ = sender.send(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (closed, receiver) = broadcast::channel(1);
                drop(closed);
                receiver
            }
        }
    }

    /// Mark closed and end the event stream
    fn close(&self) {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// A live store connection
#[async_trait]
pub trait StoreHandle: Clone + Send + Sync + 'static {
    async fn close(&self);
}

/// Opens a single connection attempt to the store
#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Handle: StoreHandle;

    async fn connect(&self, uri: &str, events: EventSink) -> Result<Self::Handle>;
}

/// Supervises the connection to the document store
pub struct ConnectionManager<C: StoreConnector> {
    connector: C,
    policy: RetryPolicy,
    events: EventSink,
    handle: tokio::sync::Mutex<Option<C::Handle>>,
}

impl<C: StoreConnector> ConnectionManager<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            events: EventSink::new(),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self) -> ConnectionState {
        self.events.state()
    }

    /// Cloneable view of the event sink, for readiness checks
    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Connect with bounded retries
    ///
    /// Waits `policy.delay` between attempts, never after the last one.
    pub async fn connect(&self, uri: &str) -> Result<C::Handle> {
        if !self.events.set_state(ConnectionState::Connecting) {
            return Err(MarqueeError::Internal(
                "Connection manager already closed".into(),
            ));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.connector.connect(uri, self.events.clone()).await {
                Ok(handle) => {
                    *self.handle.lock().await = Some(handle.clone());
                    self.events.set_state(ConnectionState::Connected);
                    info!(attempt, "Connected to store");
                    return Ok(handle);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt,
                        max_attempts,
                        error = %last_error,
                        "Store connection attempt failed"
                    );

                    if attempt < max_attempts {
                        info!(
                            delay_ms = self.policy.delay.as_millis() as u64,
                            "Retrying store connection"
                        );
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        self.events.set_state(ConnectionState::Disconnected);
        error!(attempts = max_attempts, "Giving up on store connection");

        Err(MarqueeError::Connection {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Close the connection
    ///
    /// Safe to call repeatedly or without a prior connect. Returns true only
    /// when a live connection was actually closed.
    pub async fn close(&self) -> bool {
        self.events.close();

        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => {
                handle.close().await;
                info!("Store connection closed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::Instant;

    #[derive(Debug, Clone, Default)]
    struct MockHandle {
        closes: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StoreHandle for MockHandle {
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Fails the first `failures` attempts, then succeeds
    struct FlakyConnector {
        failures: u32,
        attempts: Arc<AtomicU32>,
        handle: MockHandle,
    }

    impl FlakyConnector {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: Arc::new(AtomicU32::new(0)),
                handle: MockHandle::default(),
            }
        }
    }

    #[async_trait]
    impl StoreConnector for FlakyConnector {
        type Handle = MockHandle;

        async fn connect(&self, _uri: &str, _events: EventSink) -> Result<MockHandle> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                Err(MarqueeError::Database(format!("refused (attempt {attempt})")))
            } else {
                Ok(self.handle.clone())
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(3000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_max_attempts() {
        let connector = FlakyConnector::new(u32::MAX);
        let attempts = connector.attempts.clone();
        let manager = ConnectionManager::new(connector, policy(3));

        let started = Instant::now();
        let err = manager.connect("mongodb://unreachable").await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match err {
            MarqueeError::Connection {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("attempt 3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Two waits between three attempts, none after the last
        assert!(elapsed >= Duration::from_millis(6000));
        assert!(elapsed < Duration::from_millis(9000));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let connector = FlakyConnector::new(2);
        let attempts = connector.attempts.clone();
        let manager = ConnectionManager::new(connector, policy(5));

        assert!(manager.connect("mongodb://flaky").await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = FlakyConnector::new(0);
        let closes = connector.handle.closes.clone();
        let manager = ConnectionManager::new(connector, policy(1));

        manager.connect("mongodb://ok").await.unwrap();
        assert!(manager.close().await);
        assert!(!manager.close().await);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let manager = ConnectionManager::new(FlakyConnector::new(0), policy(1));
        assert!(!manager.close().await);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.connect("mongodb://late").await.is_err());
    }

    #[tokio::test]
    async fn test_events_update_state_and_fan_out() {
        let manager = ConnectionManager::new(FlakyConnector::new(0), policy(1));
        manager.connect("mongodb://ok").await.unwrap();
        let mut rx = manager.subscribe();
        let sink = manager.events();

        sink.emit(ConnectionEvent::Error("heartbeat failed".into()));
        assert_eq!(manager.state(), ConnectionState::Connected);

        sink.emit(ConnectionEvent::Disconnected);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        sink.emit(ConnectionEvent::Reconnected);
        assert_eq!(manager.state(), ConnectionState::Connected);

        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectionEvent::Error("heartbeat failed".into())
        );
        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Reconnected);

        manager.close().await;
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));

        // Events after close are dropped
        sink.emit(ConnectionEvent::Reconnected);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
