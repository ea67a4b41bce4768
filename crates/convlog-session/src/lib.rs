//! Conversation containers, the registry that holds them, item extraction from
//! XML payloads, and transcript writing.

/// Per-session containers.
pub mod container;
pub mod extract;
/// Extracted items.
pub mod item;
/// The registry of tracked conversations.
pub mod registry;
/// Transcript rendering and writing.
pub mod transcript;

pub use container::ConversationContainer;
pub use extract::{attribute_at, ConversationItemExtractor, ItemKind};
pub use item::{ConversationItem, Direction, ItemDetail};
pub use registry::ConversationRegistry;
pub use transcript::{FileTranscriptWriter, Transcript, TranscriptLine, TranscriptSink};
