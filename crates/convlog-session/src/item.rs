use chrono::{DateTime, Utc};
use convlog_core::CorrelationKeys;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest payload excerpt shown in an item's diagnostic rendering.
const PAYLOAD_EXCERPT_CHARS: usize = 80;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which side produced an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the local user.
    Sent,
    /// From a remote participant.
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => f.write_str("sent"),
            Self::Received => f.write_str("received"),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemDetail
// ---------------------------------------------------------------------------

/// Variant-specific fields of a [`ConversationItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemDetail {
    /// Somebody joined the conversation.
    Participant {
        /// Name shown for the participant, if known.
        display_name: Option<String>,
    },
    /// An instant message.
    Message {
        /// Sent or received.
        direction: Direction,
        /// Sender as reported in the payload.
        sender: Option<String>,
        /// Message text.
        text: Option<String>,
    },
    /// Application context data exchanged alongside the conversation.
    ContextExchange {
        /// Sent or received.
        direction: Direction,
        /// Application the context belongs to.
        application_id: Option<String>,
    },
}

impl ItemDetail {
    /// Variant name, as used in transcripts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Participant { .. } => "participant",
            Self::Message { .. } => "message",
            Self::ContextExchange { .. } => "context",
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationItem
// ---------------------------------------------------------------------------

/// A single unit of extracted session activity. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Unique id of this item.
    pub id: Uuid,
    /// Keys of the session the item came from.
    pub session: CorrelationKeys,
    /// The XML payload it was extracted from.
    pub raw_payload: String,
    /// When the item was extracted.
    pub timestamp: DateTime<Utc>,
    /// Variant fields.
    pub detail: ItemDetail,
}

impl ConversationItem {
    /// Create an item stamped with the current time.
    pub fn new(session: CorrelationKeys, raw_payload: impl Into<String>, detail: ItemDetail) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            raw_payload: raw_payload.into(),
            timestamp: Utc::now(),
            detail,
        }
    }

    /// The human-readable label only, or an empty string when unavailable.
    pub fn short_label(&self) -> &str {
        let label = match &self.detail {
            ItemDetail::Participant { display_name } => display_name,
            ItemDetail::Message { text, .. } => text,
            ItemDetail::ContextExchange { application_id, .. } => application_id,
        };
        label.as_deref().unwrap_or_default()
    }

    fn payload_excerpt(&self) -> String {
        let flat = self.raw_payload.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= PAYLOAD_EXCERPT_CHARS {
            flat
        } else {
            let cut: String = flat.chars().take(PAYLOAD_EXCERPT_CHARS).collect();
            format!("{cut}...")
        }
    }
}

/// Full diagnostic rendering: identity, payload summary, then the label.
impl fmt::Display for ConversationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.detail.kind(),
            self.session,
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )?;
        match &self.detail {
            ItemDetail::Participant { .. } => {}
            ItemDetail::Message {
                direction, sender, ..
            } => {
                write!(f, " {direction}")?;
                if let Some(sender) = sender {
                    write!(f, " from {sender}")?;
                }
            }
            ItemDetail::ContextExchange { direction, .. } => write!(f, " {direction}")?,
        }
        write!(f, ": {}, {}.", self.payload_excerpt(), self.short_label())
    }
}
