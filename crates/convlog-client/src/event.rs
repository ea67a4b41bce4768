use crate::client::ConversationSession;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Session manager events
// ---------------------------------------------------------------------------

/// Lifecycle events raised by the client's session manager.
#[derive(Debug, Clone)]
pub enum SessionManagerEvent {
    /// A conversation was opened (by either side).
    SessionAdded(Arc<dyn ConversationSession>),
    /// A conversation was closed.
    SessionRemoved(Arc<dyn ConversationSession>),
}

impl SessionManagerEvent {
    /// The session the event refers to.
    pub fn session(&self) -> &Arc<dyn ConversationSession> {
        match self {
            Self::SessionAdded(s) | Self::SessionRemoved(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// An event raised by a single conversation, together with its sender.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// The conversation that raised the event.
    pub session: Arc<dyn ConversationSession>,
    /// What happened.
    pub kind: SessionEventKind,
}

/// The content of a [`SessionEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// Content (an XML payload) arrived from a remote participant.
    ContentReceived {
        /// Raw XML payload.
        payload: String,
    },
    /// Content was sent by the local user.
    ContentSent {
        /// Raw XML payload.
        payload: String,
    },
    /// Initial context data arrived when the conversation was set up.
    InitialContentReceived {
        /// Raw XML payload.
        payload: String,
    },
    /// Initial context data was sent when the conversation was set up.
    InitialContentSent {
        /// Raw XML payload.
        payload: String,
    },
    /// A participant joined.
    ParticipantAdded {
        /// Raw XML payload describing the participant.
        payload: String,
        /// Name supplied by the client alongside the payload, if any.
        display_name: Option<String>,
    },
    /// A conversation action became (un)available.
    ActionAvailabilityChanged {
        /// Action name as reported by the client.
        action: String,
        /// Whether the action is now available.
        available: bool,
    },
    /// A conversation property changed.
    PropertyChanged {
        /// The translated property.
        property: SessionProperty,
        /// The new value.
        value: PropertyValue,
    },
}

/// Raw property code the client uses for "last instant message received at".
pub const LAST_RECEIVED_TIMESTAMP_CODE: i64 = 1_342_701_598;

/// Conversation properties the tracker cares about, translated from the
/// client's raw property codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionProperty {
    /// Timestamp of the last inbound instant message.
    LastReceivedTimestamp,
    /// Any other property, by raw code.
    Other(i64),
}

impl SessionProperty {
    /// Translate a raw property code.
    pub fn from_code(code: i64) -> Self {
        if code == LAST_RECEIVED_TIMESTAMP_CODE {
            Self::LastReceivedTimestamp
        } else {
            Self::Other(code)
        }
    }

    /// The raw code for this property.
    pub fn code(&self) -> i64 {
        match self {
            Self::LastReceivedTimestamp => LAST_RECEIVED_TIMESTAMP_CODE,
            Self::Other(code) => *code,
        }
    }
}

/// A property value as delivered by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A timestamp without zone information. The client reports these in UTC.
    Timestamp(NaiveDateTime),
    /// A text value.
    Text(String),
    /// A numeric value.
    Integer(i64),
    /// No value.
    Empty,
}

// ---------------------------------------------------------------------------
// Modality events
// ---------------------------------------------------------------------------

/// Channel kinds within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityKind {
    /// Instant messaging.
    InstantMessage,
    /// Audio and/or video call.
    AudioVideo,
}

/// Connection state of a modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityState {
    /// No activity on this channel.
    Disconnected,
    /// Connecting.
    Connecting,
    /// An incoming invitation is ringing.
    Notified,
    /// Active.
    Connected,
    /// Put on hold.
    OnHold,
    /// Tearing down.
    Disconnecting,
}

/// A modality changed state.
#[derive(Debug, Clone)]
pub struct ModalityEvent {
    /// The conversation the modality belongs to.
    pub session: Arc<dyn ConversationSession>,
    /// Which modality changed.
    pub kind: ModalityKind,
    /// State before the change.
    pub previous: ModalityState,
    /// State after the change.
    pub current: ModalityState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_translation() {
        assert_eq!(
            SessionProperty::from_code(1_342_701_598),
            SessionProperty::LastReceivedTimestamp
        );
        assert_eq!(SessionProperty::from_code(7), SessionProperty::Other(7));
        assert_eq!(SessionProperty::Other(7).code(), 7);
        assert_eq!(
            SessionProperty::LastReceivedTimestamp.code(),
            LAST_RECEIVED_TIMESTAMP_CODE
        );
    }
}
