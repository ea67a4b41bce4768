use crate::config::TrackerConfig;
use crate::guard::guard;
use crate::subscriptions::{SubscriptionManager, TargetKind};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use convlog_client::{
    ClientConnector, ClientProvider, CommunicationClient, ConversationSession, Handler, Liveness,
    ModalityEvent, ModalityState, PropertyValue, SessionEvent, SessionEventKind,
    SessionManagerEvent, SessionProperty,
};
use convlog_core::{ConvlogError, ConvlogResult, CorrelationKeys};
use convlog_session::{
    ConversationContainer, ConversationItemExtractor, ConversationRegistry, Direction, ItemKind,
    TranscriptSink,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// A client callback, queued for the dispatcher.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// The session manager reported a new conversation.
    SessionAdded(Arc<dyn ConversationSession>),
    /// The session manager reported a closed conversation.
    SessionRemoved(Arc<dyn ConversationSession>),
    /// A tracked conversation raised an event.
    Session(SessionEvent),
    /// An audio/video modality changed state.
    Modality(ModalityEvent),
}

impl From<SessionManagerEvent> for TrackerEvent {
    fn from(event: SessionManagerEvent) -> Self {
        match event {
            SessionManagerEvent::SessionAdded(session) => Self::SessionAdded(session),
            SessionManagerEvent::SessionRemoved(session) => Self::SessionRemoved(session),
        }
    }
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerStatus {
    /// Whether a live client handle is held.
    pub connected: bool,
    /// Number of tracked conversations.
    pub tracked_sessions: usize,
    /// Number of client objects with a current registration.
    pub subscribed_targets: usize,
    /// Worker ticks run so far.
    pub ticks: u64,
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Builds the guarded callbacks handed to the client.
///
/// Callbacks never touch the registry. They enqueue a [`TrackerEvent`] and, for
/// a new session, attach the session's own callbacks right away so nothing it
/// raises before the dispatcher catches up is lost.
#[derive(Clone)]
struct Callbacks {
    tx: mpsc::UnboundedSender<TrackerEvent>,
    subscriptions: Weak<SubscriptionManager>,
}

impl Callbacks {
    fn enqueue(&self, event: TrackerEvent) -> ConvlogResult<()> {
        self.tx
            .send(event)
            .map_err(|_| ConvlogError::Handler("tracker event queue is closed".into()))
    }

    fn session_manager(&self) -> Handler<SessionManagerEvent> {
        let callbacks = self.clone();
        guard("session_manager", move |event: SessionManagerEvent| {
            let added = match &event {
                SessionManagerEvent::SessionAdded(session) => Some(Arc::clone(session)),
                SessionManagerEvent::SessionRemoved(_) => None,
            };
            callbacks.enqueue(TrackerEvent::from(event))?;
            match added {
                Some(session) => callbacks.attach(&session, true),
                None => Ok(()),
            }
        })
    }

    fn session(&self) -> Handler<SessionEvent> {
        let callbacks = self.clone();
        guard("session", move |event: SessionEvent| {
            callbacks.enqueue(TrackerEvent::Session(event))
        })
    }

    fn audio_video(&self) -> Handler<ModalityEvent> {
        let callbacks = self.clone();
        guard("audio_video", move |event: ModalityEvent| {
            callbacks.enqueue(TrackerEvent::Modality(event))
        })
    }

    /// Subscribe `session` and, with `watch_audio_video`, its silent A/V channel.
    fn attach(
        &self,
        session: &Arc<dyn ConversationSession>,
        watch_audio_video: bool,
    ) -> ConvlogResult<()> {
        let Some(subscriptions) = self.subscriptions.upgrade() else {
            return Ok(());
        };
        if !session.keys().is_trackable() {
            return Ok(());
        }
        subscriptions.ensure_subscribed(session, TargetKind::Session, self.session())?;

        if watch_audio_video {
            let audio_video = session.audio_video();
            if audio_video.state() == ModalityState::Disconnected {
                subscriptions.ensure_subscribed(
                    &audio_video,
                    TargetKind::AudioVideo,
                    self.audio_video(),
                )?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// The conversation-tracking engine.
///
/// Client callbacks only enqueue [`TrackerEvent`]s. The events are applied by
/// [`handle_event`](Self::handle_event), one at a time, from the same loop that
/// runs [`tick`](Self::tick), so the registry is only ever mutated from a
/// single task.
pub struct Tracker {
    config: TrackerConfig,
    connector: ClientConnector,
    registry: ConversationRegistry,
    subscriptions: Arc<SubscriptionManager>,
    callbacks: Callbacks,
    sink: Arc<dyn TranscriptSink>,
    extractor: ConversationItemExtractor,
    events: Mutex<mpsc::UnboundedReceiver<TrackerEvent>>,
    ticks: AtomicU64,
}

impl Tracker {
    /// Build a tracker that acquires its client from `provider` and writes
    /// transcripts to `sink`.
    pub fn new(
        config: TrackerConfig,
        provider: Arc<dyn ClientProvider>,
        sink: Arc<dyn TranscriptSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(SubscriptionManager::new());
        let callbacks = Callbacks {
            tx,
            subscriptions: Arc::downgrade(&subscriptions),
        };
        Self {
            connector: ClientConnector::new(provider, config.acquire_retry()),
            config,
            registry: ConversationRegistry::new(),
            subscriptions,
            callbacks,
            sink,
            extractor: ConversationItemExtractor::new(),
            events: Mutex::new(rx),
            ticks: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracked conversations.
    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    /// Callback registrations held on client objects.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub(crate) fn events(&self) -> &Mutex<mpsc::UnboundedReceiver<TrackerEvent>> {
        &self.events
    }

    /// Snapshot of connection and tracking state.
    pub async fn status(&self) -> TrackerStatus {
        TrackerStatus {
            connected: self.connector.is_connected().await,
            tracked_sessions: self.registry.len().await,
            subscribed_targets: self.subscriptions.count(),
            ticks: self.ticks.load(Ordering::SeqCst),
        }
    }

    // -----------------------------------------------------------------------
    // Worker tick
    // -----------------------------------------------------------------------

    /// One run of the periodic worker.
    ///
    /// With no client held, blocks until one is acquired (or `shutdown` fires)
    /// and re-tracks everything it reports. Otherwise re-validates the held
    /// client and flushes according to the configured
    /// [`FlushPolicy`](crate::FlushPolicy).
    pub async fn tick(&self, shutdown: &mut watch::Receiver<bool>) {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.connector.is_connected().await {
            let Some(client) = self.connector.acquire(shutdown).await else {
                return;
            };
            if let Liveness::Lost(state) = self.connector.check_liveness().await {
                debug!(?state, "Acquired client is not active yet");
                return;
            }
            self.on_connected(client).await;
            return;
        }

        if let Liveness::Lost(state) = self.connector.check_liveness().await {
            warn!(?state, "The communication client has been lost");
            self.subscriptions.invalidate();
            return;
        }

        if self.config.flush.is_due(tick) {
            self.flush_all().await;
        }
    }

    /// Subscribe the session manager, then pick up every conversation the
    /// client already has and write their transcripts.
    async fn on_connected(&self, client: Arc<dyn CommunicationClient>) {
        let manager = client.session_manager();
        match self.subscriptions.ensure_subscribed(
            &manager,
            TargetKind::SessionManager,
            self.callbacks.session_manager(),
        ) {
            Ok(true) => info!("Session manager events subscribed"),
            Ok(false) => debug!("Session manager events already subscribed"),
            Err(e) => error!(error = %e, "Could not subscribe session manager events"),
        }

        let sessions = manager.sessions();
        debug!(count = sessions.len(), "Initializing tracking of existing sessions");
        for session in &sessions {
            self.initialize_tracking(session).await;
        }
        self.subscriptions.prune_stale();
        self.flush_all().await;
    }

    /// Make sure `session` has a container and its events are subscribed.
    pub async fn initialize_tracking(&self, session: &Arc<dyn ConversationSession>) {
        let keys = session.keys();
        if !keys.is_trackable() {
            warn!(source = %session.source_id(), "Session has no correlation keys. Not tracking");
            return;
        }
        if self.subscriptions.is_retired(session.source_id()) {
            debug!(session = %keys, "Session was already removed. Not tracking");
            return;
        }
        self.registry
            .add(ConversationContainer::new(Arc::clone(session)))
            .await;

        if let Err(e) = self.callbacks.attach(session, false) {
            error!(session = %keys, error = %e, "Could not subscribe session events");
        }
    }

    /// Write every tracked transcript.
    pub async fn flush_all(&self) {
        for container in self.registry.snapshot().await {
            self.dump(&container, None).await;
        }
    }

    async fn dump(
        &self,
        container: &ConversationContainer,
        as_of: Option<DateTime<Local>>,
    ) -> Option<PathBuf> {
        match container.dump(self.sink.as_ref(), as_of).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    session = %container.keys(),
                    file = %container.file_stem(),
                    error = %e,
                    "Failed to write transcript"
                );
                None
            }
        }
    }

    /// Detach every callback. Called once when the service stops.
    pub fn teardown(&self) {
        self.subscriptions.release_all();
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Apply every event queued so far. Returns how many were handled.
    ///
    /// Does nothing while a [`TrackerService`](crate::TrackerService) is
    /// draining the queue.
    pub async fn process_pending(&self) -> usize {
        let Ok(mut events) = self.events.try_lock() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Apply one client event to the registry.
    pub async fn handle_event(&self, event: TrackerEvent) {
        match event {
            TrackerEvent::SessionAdded(session) => self.on_session_added(&session).await,
            TrackerEvent::SessionRemoved(session) => self.on_session_removed(&session).await,
            TrackerEvent::Session(event) => self.on_session_event(event).await,
            TrackerEvent::Modality(event) => self.on_modality_changed(event).await,
        }
    }

    async fn on_session_added(&self, session: &Arc<dyn ConversationSession>) {
        debug!(session = %session.keys(), "Session added");
        self.initialize_tracking(session).await;
        if let Err(e) = self.callbacks.attach(session, true) {
            error!(session = %session.keys(), error = %e, "Could not subscribe audio/video events");
        }
    }

    async fn on_session_removed(&self, session: &Arc<dyn ConversationSession>) {
        let keys = session.keys();
        if self.registry.remove(&keys).await.is_none() {
            debug!(session = %keys, "Removed session was not tracked");
        }
        self.subscriptions.retire(session.source_id());
        self.subscriptions.retire(session.audio_video().source_id());
    }

    /// First state change of a silent audio/video channel: make sure the
    /// conversation is tracked, then stop listening.
    async fn on_modality_changed(&self, event: ModalityEvent) {
        let audio_video = event.session.audio_video();
        if !self.subscriptions.release(audio_video.source_id()) {
            debug!(session = %event.session.keys(), "Ignoring late audio/video event");
            return;
        }
        debug!(
            session = %event.session.keys(),
            previous = ?event.previous,
            current = ?event.current,
            "Audio/video activity"
        );
        if !self.registry.contains(&event.session.keys()).await {
            self.initialize_tracking(&event.session).await;
        }
    }

    async fn on_session_event(&self, event: SessionEvent) {
        let keys = event.session.keys();
        match event.kind {
            SessionEventKind::ContentReceived { payload } => {
                self.record(&keys, &payload, ItemKind::Message(Direction::Received))
                    .await;
            }
            SessionEventKind::ContentSent { payload } => {
                self.record(&keys, &payload, ItemKind::Message(Direction::Sent))
                    .await;
            }
            SessionEventKind::InitialContentReceived { payload } => {
                let kind = ItemKind::ContextExchange(Direction::Received);
                self.record(&keys, &payload, kind).await;
            }
            SessionEventKind::InitialContentSent { payload } => {
                let kind = ItemKind::ContextExchange(Direction::Sent);
                self.record(&keys, &payload, kind).await;
            }
            SessionEventKind::ParticipantAdded {
                payload,
                display_name,
            } => {
                let kind = ItemKind::Participant {
                    supplied_name: display_name,
                };
                self.record(&keys, &payload, kind).await;
            }
            SessionEventKind::ActionAvailabilityChanged { action, available } => {
                debug!(session = %keys, action = %action, available, "Action availability changed");
            }
            SessionEventKind::PropertyChanged { property, value } => {
                self.on_property_changed(&keys, property, value).await;
            }
        }
    }

    async fn on_property_changed(
        &self,
        keys: &CorrelationKeys,
        property: SessionProperty,
        value: PropertyValue,
    ) {
        match (property, value) {
            (SessionProperty::LastReceivedTimestamp, PropertyValue::Timestamp(at)) => {
                let at = utc_to_local(at);
                match self.registry.touch(keys, at).await {
                    Some(container) => {
                        if let Some(path) = self.dump(&container, Some(at)).await {
                            debug!(session = %keys, %at, path = %path.display(), "Transcript written");
                        }
                    }
                    None => debug!(session = %keys, "Last-received change for untracked session"),
                }
            }
            (SessionProperty::LastReceivedTimestamp, other) => {
                warn!(session = %keys, value = ?other, "Unexpected last-received value");
            }
            (property, value) => {
                debug!(session = %keys, code = property.code(), ?value, "Property changed");
            }
        }
    }

    /// Extract an item from `payload` and append it to the session's container.
    async fn record(&self, keys: &CorrelationKeys, payload: &str, kind: ItemKind) {
        debug!(session = %keys, ?kind, payload, "Session content");
        let item = self.extractor.extract(payload, &kind, keys);
        if !self.registry.append(keys, item).await {
            debug!(session = %keys, "Content for untracked session");
            return;
        }
        if self.config.flush.dumps_on_append() {
            if let Some(container) = self.registry.find_by_session(keys).await {
                self.dump(&container, None).await;
            }
        }
    }
}

/// The client reports timestamps in UTC without zone information.
fn utc_to_local(at: NaiveDateTime) -> DateTime<Local> {
    Utc.from_utc_datetime(&at).with_timezone(&Local)
}
