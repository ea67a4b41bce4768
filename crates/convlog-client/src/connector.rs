use crate::client::{ClientProvider, ClientState, CommunicationClient};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Result of a liveness check on the held client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No handle is held.
    Absent,
    /// The handle reports [`ClientState::Connected`].
    Alive,
    /// The handle reported another state and was discarded.
    Lost(ClientState),
}

/// Acquires and health-checks the handle on the communication client.
///
/// The handle is swapped wholesale under a lock: it is set on acquisition and
/// cleared when liveness fails, never mutated in place.
///
/// State changes are logged once per transition. A client that is running but
/// not signed in is re-acquired and dropped every tick without repeating them.
pub struct ClientConnector {
    provider: Arc<dyn ClientProvider>,
    retry_interval: Duration,
    current: RwLock<Option<Arc<dyn CommunicationClient>>>,
    /// Whether the client process was found since the last failed lookup.
    seen: AtomicBool,
    /// Last client state logged.
    reported: Mutex<Option<ClientState>>,
}

impl ClientConnector {
    /// Create a connector that polls `provider` every `retry_interval` while
    /// no client is running.
    pub fn new(provider: Arc<dyn ClientProvider>, retry_interval: Duration) -> Self {
        Self {
            provider,
            retry_interval,
            current: RwLock::new(None),
            seen: AtomicBool::new(false),
            reported: Mutex::new(None),
        }
    }

    /// The held handle, if any.
    pub async fn current(&self) -> Option<Arc<dyn CommunicationClient>> {
        self.current.read().await.clone()
    }

    /// Whether a handle is held.
    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Whether `client` reports itself as active.
    pub fn is_alive(client: &dyn CommunicationClient) -> bool {
        client.state() == ClientState::Connected
    }

    /// Block until a client is obtained or `shutdown` flips to `true`.
    ///
    /// Logs a single warning for the whole outage, however many attempts it
    /// takes. Returns `None` only when shut down.
    pub async fn acquire(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<dyn CommunicationClient>> {
        let mut warned = false;
        let mut attempts: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return None;
            }
            attempts += 1;

            match self.provider.get_client() {
                Ok(client) => {
                    let first_sighting = !self.seen.swap(true, Ordering::SeqCst);
                    if warned {
                        warn!(attempts, "The communication client is running");
                    } else if first_sighting {
                        info!("The communication client is running");
                    }
                    *self.current.write().await = Some(client.clone());
                    return Some(client);
                }
                Err(e) => {
                    if self.seen.swap(false, Ordering::SeqCst) {
                        *self.reported.lock() = None;
                    }
                    if warned {
                        debug!(attempts, error = %e, "Client still unavailable");
                    } else {
                        warn!(error = %e, "The communication client is not running. Waiting...");
                        warned = true;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = shutdown_requested(shutdown) => {
                    debug!(attempts, "Client acquisition cancelled");
                    return None;
                }
            }
        }
    }

    /// Re-validate the held handle and discard it if it is no longer active.
    pub async fn check_liveness(&self) -> Liveness {
        let mut current = self.current.write().await;
        let Some(client) = current.as_ref() else {
            return Liveness::Absent;
        };

        if Self::is_alive(client.as_ref()) {
            if self.report(ClientState::Connected) {
                info!("The communication client is signed in");
            }
            return Liveness::Alive;
        }

        let state = client.state();
        if self.report(state) {
            info!(?state, "The communication client appears to have changed status");
        }
        *current = None;
        Liveness::Lost(state)
    }

    /// Record `state` as the last logged one. Returns whether it differs.
    fn report(&self, state: ClientState) -> bool {
        let mut reported = self.reported.lock();
        if *reported == Some(state) {
            return false;
        }
        *reported = Some(state);
        true
    }
}

/// Resolves once `shutdown` carries `true` or its sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
