//! In-process client adapter.
//!
//! Emits events synchronously on the calling thread, the same way a real client
//! raises callbacks on its own dispatch threads. Used by the replay driver and
//! by tests.

use crate::client::{
    ClientProvider, CommunicationClient, ConversationSession, EventSource, Handler, Modality,
    SessionManager, SourceId, SubscriptionToken, ACTIVE_STATUS_CODE,
};
use crate::event::{
    ModalityEvent, ModalityKind, ModalityState, PropertyValue, SessionEvent, SessionEventKind,
    SessionManagerEvent, SessionProperty,
};
use chrono::NaiveDateTime;
use convlog_core::{ConvlogError, ConvlogResult, CorrelationKeys};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

struct Subscribers<E> {
    handlers: Mutex<Vec<(SubscriptionToken, Handler<E>)>>,
}

impl<E: Clone> Subscribers<E> {
    fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, handler: Handler<E>) -> SubscriptionToken {
        let token = SubscriptionToken(next_id());
        self.handlers.lock().push((token, handler));
        token
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        handlers.len() != before
    }

    fn count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Invoke every handler outside the lock so handlers may (un)subscribe.
    fn emit(&self, event: E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryModality
// ---------------------------------------------------------------------------

/// Audio/video modality of an [`InMemorySession`].
pub struct InMemoryModality {
    id: SourceId,
    state: Mutex<ModalityState>,
    session: Weak<InMemorySession>,
    subscribers: Subscribers<ModalityEvent>,
}

impl InMemoryModality {
    /// Change state and raise `ModalityStateChanged`.
    pub fn set_state(&self, current: ModalityState) {
        let previous = std::mem::replace(&mut *self.state.lock(), current);
        let Some(session) = self.session.upgrade() else {
            return;
        };
        self.subscribers.emit(ModalityEvent {
            session: session as Arc<dyn ConversationSession>,
            kind: ModalityKind::AudioVideo,
            previous,
            current,
        });
    }

    /// Number of attached handlers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }
}

impl EventSource<ModalityEvent> for InMemoryModality {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, handler: Handler<ModalityEvent>) -> ConvlogResult<SubscriptionToken> {
        Ok(self.subscribers.subscribe(handler))
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.unsubscribe(token)
    }
}

impl Modality for InMemoryModality {
    fn kind(&self) -> ModalityKind {
        ModalityKind::AudioVideo
    }

    fn state(&self) -> ModalityState {
        *self.state.lock()
    }
}

// ---------------------------------------------------------------------------
// InMemorySession
// ---------------------------------------------------------------------------

/// A conversation held by an [`InMemorySessionManager`].
pub struct InMemorySession {
    id: SourceId,
    keys: RwLock<CorrelationKeys>,
    audio_video: Arc<InMemoryModality>,
    subscribers: Subscribers<SessionEvent>,
    this: Weak<InMemorySession>,
}

impl InMemorySession {
    /// Create a detached session. Use [`InMemorySessionManager::add_session`]
    /// to make the manager announce it.
    pub fn new(keys: CorrelationKeys) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<InMemorySession>| Self {
            id: SourceId(next_id()),
            keys: RwLock::new(keys),
            audio_video: Arc::new(InMemoryModality {
                id: SourceId(next_id()),
                state: Mutex::new(ModalityState::Disconnected),
                session: this.clone(),
                subscribers: Subscribers::new(),
            }),
            subscribers: Subscribers::new(),
            this: this.clone(),
        })
    }

    /// Replace the correlation keys, e.g. when the client fills in the
    /// secondary id late.
    pub fn set_keys(&self, keys: CorrelationKeys) {
        *self.keys.write() = keys;
    }

    /// Raise a session event.
    pub fn emit(&self, kind: SessionEventKind) {
        let Some(session) = self.this.upgrade() else {
            return;
        };
        self.subscribers.emit(SessionEvent {
            session: session as Arc<dyn ConversationSession>,
            kind,
        });
    }

    /// Raise `PropertyChanged(LastReceivedTimestamp, at)`.
    pub fn emit_last_received(&self, at: NaiveDateTime) {
        self.emit(SessionEventKind::PropertyChanged {
            property: SessionProperty::LastReceivedTimestamp,
            value: PropertyValue::Timestamp(at),
        });
    }

    /// The concrete audio/video modality, for driving state changes.
    pub fn modality(&self) -> &Arc<InMemoryModality> {
        &self.audio_video
    }

    /// Number of attached handlers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }
}

impl EventSource<SessionEvent> for InMemorySession {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, handler: Handler<SessionEvent>) -> ConvlogResult<SubscriptionToken> {
        Ok(self.subscribers.subscribe(handler))
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.unsubscribe(token)
    }
}

impl ConversationSession for InMemorySession {
    fn keys(&self) -> CorrelationKeys {
        self.keys.read().clone()
    }

    fn audio_video(&self) -> Arc<dyn Modality> {
        self.audio_video.clone()
    }
}

// ---------------------------------------------------------------------------
// InMemorySessionManager
// ---------------------------------------------------------------------------

/// Conversation manager of an [`InMemoryClient`].
pub struct InMemorySessionManager {
    id: SourceId,
    sessions: Mutex<Vec<Arc<InMemorySession>>>,
    subscribers: Subscribers<SessionManagerEvent>,
}

impl InMemorySessionManager {
    fn new() -> Self {
        Self {
            id: SourceId(next_id()),
            sessions: Mutex::new(Vec::new()),
            subscribers: Subscribers::new(),
        }
    }

    /// Open a conversation and raise `SessionAdded`.
    pub fn add_session(&self, keys: CorrelationKeys) -> Arc<InMemorySession> {
        let session = self.insert_session(keys);
        self.subscribers
            .emit(SessionManagerEvent::SessionAdded(session.clone()));
        session
    }

    /// Open a conversation without raising any event, as if it already existed
    /// before anyone subscribed.
    pub fn insert_session(&self, keys: CorrelationKeys) -> Arc<InMemorySession> {
        let session = InMemorySession::new(keys);
        self.sessions.lock().push(session.clone());
        session
    }

    /// Raise `SessionAdded` for a session again, as clients occasionally do.
    pub fn announce(&self, session: &Arc<InMemorySession>) {
        self.subscribers
            .emit(SessionManagerEvent::SessionAdded(session.clone()));
    }

    /// Close the first conversation matching `keys` and raise `SessionRemoved`.
    pub fn remove_session(&self, keys: &CorrelationKeys) -> Option<Arc<InMemorySession>> {
        let removed = {
            let mut sessions = self.sessions.lock();
            let pos = sessions.iter().position(|s| s.keys().matches(keys))?;
            sessions.remove(pos)
        };
        self.subscribers
            .emit(SessionManagerEvent::SessionRemoved(removed.clone()));
        Some(removed)
    }

    /// Look up an open conversation by either key.
    pub fn find(&self, key: &str) -> Option<Arc<InMemorySession>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.keys().matches_key(key))
            .cloned()
    }

    /// Number of attached handlers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }
}

impl EventSource<SessionManagerEvent> for InMemorySessionManager {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(
        &self,
        handler: Handler<SessionManagerEvent>,
    ) -> ConvlogResult<SubscriptionToken> {
        Ok(self.subscribers.subscribe(handler))
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.unsubscribe(token)
    }
}

impl SessionManager for InMemorySessionManager {
    fn sessions(&self) -> Vec<Arc<dyn ConversationSession>> {
        self.sessions
            .lock()
            .iter()
            .map(|s| s.clone() as Arc<dyn ConversationSession>)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// InMemoryClient / InMemoryProvider
// ---------------------------------------------------------------------------

/// A client whose status code can be changed at will.
pub struct InMemoryClient {
    status: AtomicI32,
    manager: Arc<InMemorySessionManager>,
}

impl InMemoryClient {
    /// A signed-in client with no conversations.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicI32::new(ACTIVE_STATUS_CODE),
            manager: Arc::new(InMemorySessionManager::new()),
        })
    }

    /// Set the raw status code.
    pub fn set_status_code(&self, code: i32) {
        self.status.store(code, Ordering::SeqCst);
    }

    /// The concrete session manager, for driving events.
    pub fn manager(&self) -> &Arc<InMemorySessionManager> {
        &self.manager
    }
}

impl CommunicationClient for InMemoryClient {
    fn status_code(&self) -> ConvlogResult<i32> {
        Ok(self.status.load(Ordering::SeqCst))
    }

    fn session_manager(&self) -> Arc<dyn SessionManager> {
        self.manager.clone()
    }
}

/// A provider that hands out whichever client is currently installed.
#[derive(Default)]
pub struct InMemoryProvider {
    client: Mutex<Option<Arc<InMemoryClient>>>,
    attempts: AtomicUsize,
}

impl InMemoryProvider {
    /// A provider with no client running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `client` the running client.
    pub fn install(&self, client: Arc<InMemoryClient>) {
        *self.client.lock() = Some(client);
    }

    /// Simulate the client process exiting.
    pub fn uninstall(&self) -> Option<Arc<InMemoryClient>> {
        self.client.lock().take()
    }

    /// The currently installed client.
    pub fn installed(&self) -> Option<Arc<InMemoryClient>> {
        self.client.lock().clone()
    }

    /// How many times [`ClientProvider::get_client`] was called.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ClientProvider for InMemoryProvider {
    fn get_client(&self) -> ConvlogResult<Arc<dyn CommunicationClient>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.client.lock().as_ref() {
            Some(client) => Ok(client.clone() as Arc<dyn CommunicationClient>),
            None => Err(ConvlogError::ClientUnavailable(
                "no communication client process is running".into(),
            )),
        }
    }
}
