use crate::event::{
    ModalityEvent, ModalityKind, ModalityState, SessionEvent, SessionManagerEvent,
};
use convlog_core::{ConvlogResult, CorrelationKeys};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A callback attached to an [`EventSource`].
///
/// The client invokes handlers on its own dispatch threads.
pub type Handler<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Identifies one registration on an [`EventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

/// Stable identity of an event-emitting client object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything the tracker can attach callbacks to.
pub trait EventSource<E>: Send + Sync {
    /// Identity of this object, stable for its lifetime.
    fn source_id(&self) -> SourceId;

    /// Register `handler`. The returned token detaches it again.
    fn subscribe(&self, handler: Handler<E>) -> ConvlogResult<SubscriptionToken>;

    /// Detach a registration. Returns `false` if the token was unknown.
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;
}

/// A live conversation inside the client.
pub trait ConversationSession: EventSource<SessionEvent> {
    /// Current correlation keys. The secondary key may appear later.
    fn keys(&self) -> CorrelationKeys;

    /// The audio/video modality of this conversation.
    fn audio_video(&self) -> Arc<dyn Modality>;
}

impl fmt::Debug for dyn ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("source", &self.source_id())
            .field("keys", &self.keys())
            .finish()
    }
}

/// A channel within a conversation.
pub trait Modality: EventSource<ModalityEvent> {
    /// Which channel this is.
    fn kind(&self) -> ModalityKind;

    /// Current state.
    fn state(&self) -> ModalityState;
}

/// The client's conversation manager.
pub trait SessionManager: EventSource<SessionManagerEvent> {
    /// Conversations the client currently knows about.
    fn sessions(&self) -> Vec<Arc<dyn ConversationSession>>;
}

/// Raw status code a client reports while signed in and usable.
pub const ACTIVE_STATUS_CODE: i32 = 3;

/// Client state as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// Running but not signed in (or still starting up).
    Disconnected,
    /// Signed in and delivering events.
    Connected,
    /// Shutting down, crashed, or unreachable.
    Lost,
}

impl ClientState {
    /// Translate the client's raw status code.
    pub fn from_status_code(code: i32) -> Self {
        match code {
            ACTIVE_STATUS_CODE => Self::Connected,
            0..=2 | 4 | 6 => Self::Disconnected,
            _ => Self::Lost,
        }
    }
}

/// A handle on a running communication client.
pub trait CommunicationClient: Send + Sync {
    /// The raw status code, or an error if the client can no longer be queried.
    fn status_code(&self) -> ConvlogResult<i32>;

    /// The conversation manager of this client.
    fn session_manager(&self) -> Arc<dyn SessionManager>;

    /// Translated state. A failed status query counts as [`ClientState::Lost`].
    fn state(&self) -> ClientState {
        match self.status_code() {
            Ok(code) => ClientState::from_status_code(code),
            Err(_) => ClientState::Lost,
        }
    }
}

/// Locates a running client.
pub trait ClientProvider: Send + Sync {
    /// Returns the running client, or
    /// [`ConvlogError::ClientUnavailable`](convlog_core::ConvlogError::ClientUnavailable)
    /// when there is none.
    fn get_client(&self) -> ConvlogResult<Arc<dyn CommunicationClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_translation() {
        assert_eq!(ClientState::from_status_code(3), ClientState::Connected);
        assert_eq!(ClientState::from_status_code(1), ClientState::Disconnected);
        assert_eq!(ClientState::from_status_code(0), ClientState::Disconnected);
        assert_eq!(ClientState::from_status_code(5), ClientState::Lost);
        assert_eq!(ClientState::from_status_code(-1), ClientState::Lost);
    }
}
