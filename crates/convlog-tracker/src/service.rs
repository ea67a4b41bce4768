use crate::tracker::Tracker;
use convlog_client::shutdown_requested;
use convlog_core::{ConvlogError, ConvlogResult};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Runs a [`Tracker`] in the background.
///
/// One task drains the event queue and fires the worker tick, so event
/// handling and ticks never overlap. The first tick runs immediately.
pub struct TrackerService {
    tracker: Arc<Tracker>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TrackerService {
    /// Spawn the worker on the current runtime.
    pub fn start(tracker: Arc<Tracker>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(&tracker), shutdown_rx));
        info!(
            tick_ms = tracker.config().tick_interval_ms,
            flush = ?tracker.config().flush,
            "Tracker service started"
        );
        Self {
            tracker,
            shutdown,
            handle: Some(handle),
        }
    }

    /// The tracker this service runs.
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Whether the worker task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for it to detach its callbacks.
    ///
    /// A pending client acquisition is cancelled. Callbacks already running
    /// on client threads finish on their own; their events are discarded.
    pub async fn stop(mut self) -> ConvlogResult<()> {
        info!("Stopping tracker service");
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| ConvlogError::Handler(format!("Tracker worker failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for TrackerService {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown.send(true);
        }
    }
}

async fn run(tracker: Arc<Tracker>, mut shutdown: watch::Receiver<bool>) {
    let mut tick_shutdown = shutdown.clone();
    let mut events = tracker.events().lock().await;
    let mut timer = tokio::time::interval(tracker.config().tick_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            Some(event) = events.recv() => tracker.handle_event(event).await,
            _ = timer.tick() => tracker.tick(&mut tick_shutdown).await,
        }
    }

    let dropped = {
        let mut dropped = 0;
        while events.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    };
    if dropped > 0 {
        debug!(dropped, "Discarded queued events on shutdown");
    }
    tracker.teardown();
    info!("Tracker service stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use convlog_client::InMemoryProvider;
    use convlog_session::FileTranscriptWriter;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_cancels_pending_acquisition() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::new());
        let config = TrackerConfig {
            tick_interval_ms: 10,
            acquire_retry_ms: 3_600_000,
            ..TrackerConfig::default()
        };
        let tracker = Arc::new(Tracker::new(
            config,
            provider.clone(),
            Arc::new(FileTranscriptWriter::new(tmp.path())),
        ));

        let service = TrackerService::start(tracker);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(service.is_running());
        assert_eq!(provider.attempts(), 1);

        tokio::time::timeout(Duration::from_secs(5), service.stop())
            .await
            .expect("stop should not wait for the retry interval")
            .unwrap();
    }
}
