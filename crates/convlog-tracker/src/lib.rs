//! The conversation-tracking engine.
//!
//! A [`Tracker`] owns the client connector, the conversation registry and the
//! subscription manager. Client callbacks, always wrapped by [`guard`], only
//! queue [`TrackerEvent`]s; a [`TrackerService`] drains the queue and runs the
//! periodic health, re-tracking and flush tick from a single task.

/// Tracker configuration.
pub mod config;
pub mod guard;
/// Background service running the tracker.
pub mod service;
/// Callback registrations on client objects.
pub mod subscriptions;
/// The tracker engine.
pub mod tracker;

pub use config::{FlushPolicy, TrackerConfig};
pub use guard::guard;
pub use service::TrackerService;
pub use subscriptions::{SubscriptionManager, TargetKind};
pub use tracker::{Tracker, TrackerEvent, TrackerStatus};
