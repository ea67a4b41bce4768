//! Core types and error definitions for the convlog conversation tracker.
//!
//! This crate provides the foundational types shared across all convlog crates.
//!
//! # Main types
//!
//! - [`ConvlogError`]: Unified error enum for all convlog subsystems.
//! - [`ConvlogResult`]: Convenience alias for `Result<T, ConvlogError>`.
//! - [`CorrelationKeys`]: The dual key used to match session events to a tracked
//!   conversation.

use serde::{Deserialize, Serialize};
use std::fmt;

// --- Error types ---

/// Top-level error type for convlog.
///
/// Each variant corresponds to a failure class the tracker knows how to handle.
/// None of them is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ConvlogError {
    /// No communication client process is available (yet).
    #[error("Client unavailable: {0}")]
    ClientUnavailable(String),

    /// A client handle was held but stopped reporting itself as active.
    #[error("Client lost: {0}")]
    ClientLost(String),

    /// Attaching or detaching event callbacks failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// An event handler failed while processing a client callback.
    #[error("Handler error: {0}")]
    Handler(String),

    /// An event payload could not be parsed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A transcript could not be rendered or written.
    #[error("Transcript error: {0}")]
    Transcript(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error (directory creation, transcript write).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConvlogError`].
pub type ConvlogResult<T> = Result<T, ConvlogError>;

// --- Correlation keys ---

/// The two identifiers a client exposes for a conversation.
///
/// The client populates `secondary_id` inconsistently, so lookups match on
/// either key. An empty key never matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKeys {
    /// The conversation id reported by the client.
    pub primary_id: String,
    /// A fallback id, sometimes the only one populated.
    #[serde(default)]
    pub secondary_id: String,
}

impl CorrelationKeys {
    /// Creates a key pair from its two parts.
    pub fn new(primary_id: impl Into<String>, secondary_id: impl Into<String>) -> Self {
        Self {
            primary_id: primary_id.into(),
            secondary_id: secondary_id.into(),
        }
    }

    /// Creates a key pair with only the primary id populated.
    pub fn primary(primary_id: impl Into<String>) -> Self {
        Self::new(primary_id, String::new())
    }

    /// A session is trackable only if at least one key is populated.
    pub fn is_trackable(&self) -> bool {
        !self.primary_id.is_empty() || !self.secondary_id.is_empty()
    }

    /// OR-match between two key pairs, ignoring empty keys.
    pub fn matches(&self, other: &CorrelationKeys) -> bool {
        self.matches_key(&other.primary_id) || self.matches_key(&other.secondary_id)
    }

    /// Whether `key` equals either populated key of this pair.
    pub fn matches_key(&self, key: &str) -> bool {
        !key.is_empty() && (self.primary_id == key || self.secondary_id == key)
    }

    /// The key used to name things derived from this session: the primary id
    /// when present, otherwise the secondary one.
    pub fn preferred(&self) -> &str {
        if self.primary_id.is_empty() {
            &self.secondary_id
        } else {
            &self.primary_id
        }
    }
}

impl fmt::Display for CorrelationKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.primary_id.is_empty(), self.secondary_id.is_empty()) {
            (false, false) => write!(f, "{}/{}", self.primary_id, self.secondary_id),
            (false, true) => f.write_str(&self.primary_id),
            (true, false) => write!(f, "~{}", self.secondary_id),
            (true, true) => f.write_str("<untracked>"),
        }
    }
}
