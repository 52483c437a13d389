//! Process lifecycle coordination
//!
//! Startup order is: connect the store, build shared state, start serving.
//! Shutdown is driven by `ShutdownTrigger` messages from the signal listener
//! or any holder of a `ShutdownHandle`. The first trigger wins; teardown
//! (stop accepting, drain, close the store) runs exactly once and yields the
//! process exit code.

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::{ConnectionManager, EventSink, StoreConnector};
use crate::server::{serve, AppState};
use crate::types::MarqueeError;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Serving,
    Draining,
    FailedStartup,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Termination signal, by name
    Signal(&'static str),
    /// Unrecoverable runtime error
    Fatal(String),
}

/// Sends shutdown triggers to the coordinator
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ShutdownTrigger>,
}

impl ShutdownHandle {
    /// Returns false once the coordinator is gone
    pub fn trigger(&self, trigger: ShutdownTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }
}

/// Forward SIGINT and SIGTERM to the coordinator until it goes away
pub fn spawn_signal_listener(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    None
                }
            };

        loop {
            #[cfg(unix)]
            let name = tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => "SIGINT",
                    Err(e) => {
                        error!("Failed to listen for SIGINT: {}", e);
                        return;
                    }
                },
                Some(()) = async {
                    match sigterm.as_mut() {
                        Some(s) => s.recv().await,
                        None => std::future::pending().await,
                    }
                } => "SIGTERM",
            };

            #[cfg(not(unix))]
            let name = match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(e) => {
                    error!("Failed to listen for SIGINT: {}", e);
                    return;
                }
            };

            if !handle.trigger(ShutdownTrigger::Signal(name)) {
                return;
            }
        }
    })
}

/// Owns startup ordering and the single teardown path
pub struct Lifecycle<C: StoreConnector> {
    args: Args,
    manager: Arc<ConnectionManager<C>>,
    phase: watch::Sender<Phase>,
    handle: ShutdownHandle,
    triggers: mpsc::UnboundedReceiver<ShutdownTrigger>,
}

impl<C> Lifecycle<C>
where
    C: StoreConnector + 'static,
{
    pub fn new(args: Args, manager: ConnectionManager<C>) -> Self {
        let (tx, triggers) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            args,
            manager: Arc::new(manager),
            phase,
            handle: ShutdownHandle { tx },
            triggers,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn manager(&self) -> Arc<ConnectionManager<C>> {
        Arc::clone(&self.manager)
    }

    fn set_phase(&self, phase: Phase) {
        info!(phase = ?phase, "Lifecycle phase");
        self.phase.send_replace(phase);
    }

    async fn fail_startup(&self, err: MarqueeError) -> i32 {
        error!(error = %err, "Startup failed");
        self.set_phase(Phase::FailedStartup);
        self.manager.close().await;
        self.set_phase(Phase::Closed);
        EXIT_FAILURE
    }

    /// Stop a startup that a trigger interrupted before serving began
    async fn abort_startup(&self, trigger: Option<ShutdownTrigger>) -> i32 {
        let exit_code = match trigger {
            Some(ShutdownTrigger::Signal(name)) => {
                info!(signal = %name, "Received shutdown signal while connecting");
                EXIT_OK
            }
            Some(ShutdownTrigger::Fatal(reason)) => {
                error!(reason = %reason, "Fatal error while connecting");
                self.set_phase(Phase::FailedStartup);
                EXIT_FAILURE
            }
            None => {
                self.set_phase(Phase::FailedStartup);
                EXIT_FAILURE
            }
        };

        self.manager.close().await;
        self.set_phase(Phase::Closed);
        exit_code
    }

    /// Run until shutdown and return the exit code
    ///
    /// `build_state` turns the live store handle into the shared request
    /// state; it only runs after the store connection succeeded.
    pub async fn run<F, Fut>(mut self, build_state: F) -> i32
    where
        F: FnOnce(C::Handle, EventSink) -> Fut,
        Fut: Future<Output = Result<AppState, MarqueeError>>,
    {
        self.set_phase(Phase::Connecting);

        let uri = self.args.mongo_uri.clone().unwrap_or_default();
        // A trigger during the retry window cancels the remaining attempts
        let connected = tokio::select! {
            result = self.manager.connect(&uri) => Ok(result),
            trigger = self.triggers.recv() => Err(trigger),
        };
        let store = match connected {
            Ok(Ok(store)) => store,
            Ok(Err(e)) => return self.fail_startup(e).await,
            Err(trigger) => return self.abort_startup(trigger).await,
        };

        let state = match build_state(store, self.manager.events()).await {
            Ok(state) => Arc::new(state),
            Err(e) => return self.fail_startup(e).await,
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let server = if self.args.is_test_mode() {
            info!("Test mode, not binding a socket");
            None
        } else {
            let addr = self.args.listen_addr();
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!("Marquee listening on {}", addr);
                    Some(tokio::spawn(serve(
                        listener,
                        state,
                        self.handle.clone(),
                        stop_rx,
                        self.args.drain_timeout(),
                    )))
                }
                Err(e) => {
                    return self
                        .fail_startup(MarqueeError::Internal(format!(
                            "Failed to bind {}: {}",
                            addr, e
                        )))
                        .await
                }
            }
        };
        self.set_phase(Phase::Serving);

        let trigger = self
            .triggers
            .recv()
            .await
            .unwrap_or_else(|| ShutdownTrigger::Fatal("shutdown channel closed".into()));

        let exit_code = match &trigger {
            ShutdownTrigger::Signal(name) => {
                info!(signal = %name, "Received shutdown signal");
                self.set_phase(Phase::Draining);
                EXIT_OK
            }
            ShutdownTrigger::Fatal(reason) => {
                error!(reason = %reason, "Fatal runtime error, shutting down");
                self.set_phase(Phase::FailedStartup);
                EXIT_FAILURE
            }
        };

        // Every step runs even if an earlier one fails
        let manager = Arc::clone(&self.manager);
        let teardown = async move {
            let _ = stop_tx.send(());
            if let Some(server) = server {
                match server.await {
                    Ok(true) => {}
                    Ok(false) => warn!("Connections still open at drain deadline"),
                    Err(e) => error!("Server task failed: {}", e),
                }
            }
            manager.close().await;
        };
        tokio::pin!(teardown);

        loop {
            tokio::select! {
                _ = &mut teardown => break,
                Some(extra) = self.triggers.recv() => {
                    info!(trigger = ?extra, "Shutdown already in progress, ignoring");
                }
            }
        }

        self.set_phase(Phase::Closed);
        info!(exit_code, "Shutdown complete");
        exit_code
    }
}
