//! Adapter boundary to the external communication client.
//!
//! The client itself is not reimplemented here. This crate defines the traits a
//! client adapter implements, the events it raises, the translation of its raw
//! status and property codes, and the [`ClientConnector`] that acquires and
//! health-checks a client handle. [`memory`] provides an in-process adapter.

/// Adapter traits and state translation.
pub mod client;
/// Client acquisition and liveness.
pub mod connector;
/// Events raised by the client.
pub mod event;
pub mod memory;

pub use client::{
    ClientProvider, ClientState, CommunicationClient, ConversationSession, EventSource, Handler,
    Modality, SessionManager, SourceId, SubscriptionToken, ACTIVE_STATUS_CODE,
};
pub use connector::{shutdown_requested, ClientConnector, Liveness};
pub use event::{
    ModalityEvent, ModalityKind, ModalityState, PropertyValue, SessionEvent, SessionEventKind,
    SessionManagerEvent, SessionProperty, LAST_RECEIVED_TIMESTAMP_CODE,
};
pub use memory::{InMemoryClient, InMemoryProvider, InMemorySession, InMemorySessionManager};
