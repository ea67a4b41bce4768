use convlog_client::{EventSource, Handler, SourceId, SubscriptionToken};
use convlog_core::{ConvlogError, ConvlogResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What kind of client object a registration is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// The client's session manager (session added / removed).
    SessionManager,
    /// A single conversation (content, participants, properties).
    Session,
    /// The audio/video modality of a conversation (one-shot).
    AudioVideo,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionManager => f.write_str("session manager"),
            Self::Session => f.write_str("session"),
            Self::AudioVideo => f.write_str("audio/video modality"),
        }
    }
}

struct Registration {
    kind: TargetKind,
    epoch: u64,
    detach: Box<dyn Fn() -> bool + Send + Sync>,
}

#[derive(Default)]
struct State {
    epoch: u64,
    records: HashMap<SourceId, Registration>,
    /// Objects the client reported gone. Never subscribed again.
    retired: HashSet<SourceId>,
}

/// Owns every callback registration the tracker holds on client objects.
///
/// Each target gets at most one registration, recorded here by its
/// [`SourceId`] together with the token that detaches it. Whether a target is
/// subscribed is answered from these records alone; the target is never asked.
///
/// Records carry the client epoch they were made in. [`invalidate`](Self::invalidate)
/// starts a new epoch when the client is lost, turning every record stale. A
/// stale record is detached before its target is subscribed again, so a client
/// that comes back with the same objects never ends up with two callbacks.
///
/// [`retire`](Self::retire) releases a target for good. A subscription attempt
/// that arrives for it afterwards, from a callback still running on a client
/// thread, is refused.
#[derive(Default)]
pub struct SubscriptionManager {
    state: Mutex<State>,
}

impl SubscriptionManager {
    /// A manager with no registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to `target` unless it is already attached in the
    /// current epoch.
    ///
    /// Returns `Ok(true)` if a registration was made and `Ok(false)` if one
    /// already existed. On error nothing is recorded.
    pub fn ensure_subscribed<E, T>(
        &self,
        target: &Arc<T>,
        kind: TargetKind,
        handler: Handler<E>,
    ) -> ConvlogResult<bool>
    where
        E: 'static,
        T: EventSource<E> + ?Sized + 'static,
    {
        let source = target.source_id();
        let mut state = self.state.lock();
        let epoch = state.epoch;

        if state.retired.contains(&source) {
            debug!(%source, %kind, "Target was retired. Not subscribing");
            return Ok(false);
        }

        if let Some(existing) = state.records.get(&source) {
            if existing.epoch == epoch {
                debug!(%source, %kind, "Events already subscribed. Skipping");
                return Ok(false);
            }
        }
        if let Some(stale) = state.records.remove(&source) {
            let detached = (stale.detach)();
            debug!(%source, kind = %stale.kind, detached, "Detached stale registration");
        }

        let token = target.subscribe(handler).map_err(|e| {
            ConvlogError::Subscription(format!("Failed to subscribe {kind} {source}: {e}"))
        })?;
        state.records.insert(
            source,
            Registration {
                kind,
                epoch,
                detach: detacher::<E, T>(target, token),
            },
        );
        debug!(%source, %kind, "Events subscribed");
        Ok(true)
    }

    /// Whether `source` holds a registration in the current epoch. Unknown
    /// sources are reported as not subscribed.
    pub fn is_subscribed(&self, source: SourceId) -> bool {
        let state = self.state.lock();
        state
            .records
            .get(&source)
            .is_some_and(|r| r.epoch == state.epoch)
    }

    /// Detach and forget the registration on `source`.
    pub fn release(&self, source: SourceId) -> bool {
        let Some(registration) = self.state.lock().records.remove(&source) else {
            return false;
        };
        let detached = (registration.detach)();
        debug!(%source, kind = %registration.kind, detached, "Events unsubscribed");
        true
    }

    /// Release `source` and refuse any later subscription to it. Returns
    /// whether a registration was held.
    pub fn retire(&self, source: SourceId) -> bool {
        let registration = {
            let mut state = self.state.lock();
            state.retired.insert(source);
            state.records.remove(&source)
        };
        let Some(registration) = registration else {
            return false;
        };
        let detached = (registration.detach)();
        debug!(%source, kind = %registration.kind, detached, "Events unsubscribed for good");
        true
    }

    /// Whether `source` was retired.
    pub fn is_retired(&self, source: SourceId) -> bool {
        self.state.lock().retired.contains(&source)
    }

    /// Mark every registration stale, e.g. after the client was lost. Nothing
    /// is detached: the old client may no longer answer.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        debug!(
            epoch = state.epoch,
            stale = state.records.len(),
            "Subscriptions invalidated"
        );
    }

    /// Detach and forget registrations still stale from an earlier epoch.
    /// Returns how many were dropped.
    pub fn prune_stale(&self) -> usize {
        let stale: Vec<Registration> = {
            let mut state = self.state.lock();
            let epoch = state.epoch;
            let sources: Vec<SourceId> = state
                .records
                .iter()
                .filter(|(_, r)| r.epoch != epoch)
                .map(|(source, _)| *source)
                .collect();
            sources
                .iter()
                .filter_map(|source| state.records.remove(source))
                .collect()
        };
        for registration in &stale {
            (registration.detach)();
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "Pruned stale subscriptions");
        }
        stale.len()
    }

    /// Detach everything. Used on service teardown.
    pub fn release_all(&self) -> usize {
        let records: Vec<(SourceId, Registration)> = {
            let mut state = self.state.lock();
            state.retired.clear();
            state.records.drain().collect()
        };
        let mut failed = 0;
        for (source, registration) in &records {
            if !(registration.detach)() {
                failed += 1;
                warn!(%source, kind = %registration.kind, "Registration was already gone");
            }
        }
        info!(count = records.len(), failed, "Released all subscriptions");
        records.len()
    }

    /// Number of registrations in the current epoch.
    pub fn count(&self) -> usize {
        let state = self.state.lock();
        state
            .records
            .values()
            .filter(|r| r.epoch == state.epoch)
            .count()
    }

    /// Number of current-epoch registrations of `kind`.
    pub fn count_of(&self, kind: TargetKind) -> usize {
        let state = self.state.lock();
        state
            .records
            .values()
            .filter(|r| r.epoch == state.epoch && r.kind == kind)
            .count()
    }
}

fn detacher<E, T>(
    target: &Arc<T>,
    token: SubscriptionToken,
) -> Box<dyn Fn() -> bool + Send + Sync>
where
    E: 'static,
    T: EventSource<E> + ?Sized + 'static,
{
    let target = Arc::clone(target);
    Box::new(move || EventSource::<E>::unsubscribe(&*target, token))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use convlog_client::{InMemoryClient, InMemorySession, SessionEvent, SessionManagerEvent};
    use convlog_core::CorrelationKeys;

    fn noop<E: 'static>() -> Handler<E> {
        Arc::new(|_event: E| {})
    }

    #[test]
    fn test_repeated_subscribe_registers_once() {
        let manager = SubscriptionManager::new();
        let session = InMemorySession::new(CorrelationKeys::primary("S1"));

        assert!(manager
            .ensure_subscribed(&session, TargetKind::Session, noop::<SessionEvent>())
            .unwrap());
        for _ in 0..10 {
            assert!(!manager
                .ensure_subscribed(&session, TargetKind::Session, noop::<SessionEvent>())
                .unwrap());
        }

        assert_eq!(session.subscriber_count(), 1);
        assert_eq!(manager.count(), 1);
        assert!(manager.is_subscribed(session.source_id()));
    }

    #[test]
    fn test_unknown_target_is_not_subscribed() {
        let manager = SubscriptionManager::new();
        assert!(!manager.is_subscribed(SourceId(u64::MAX)));
        assert!(!manager.release(SourceId(u64::MAX)));
    }

    #[test]
    fn test_retired_target_is_never_subscribed_again() {
        let manager = SubscriptionManager::new();
        let session = InMemorySession::new(CorrelationKeys::primary("S1"));
        manager
            .ensure_subscribed(&session, TargetKind::Session, noop::<SessionEvent>())
            .unwrap();

        assert!(manager.retire(session.source_id()));
        assert!(manager.is_retired(session.source_id()));
        assert!(!manager
            .ensure_subscribed(&session, TargetKind::Session, noop::<SessionEvent>())
            .unwrap());
        assert_eq!(session.subscriber_count(), 0);
        assert_eq!(manager.count(), 0);

        // Retiring something never subscribed still blocks it.
        let other = InMemorySession::new(CorrelationKeys::primary("S2"));
        assert!(!manager.retire(other.source_id()));
        assert!(!manager
            .ensure_subscribed(&other, TargetKind::Session, noop::<SessionEvent>())
            .unwrap());
        assert_eq!(other.subscriber_count(), 0);
    }

    #[test]
    fn test_release_detaches() {
        let manager = SubscriptionManager::new();
        let session = InMemorySession::new(CorrelationKeys::primary("S1"));
        manager
            .ensure_subscribed(&session, TargetKind::Session, noop::<SessionEvent>())
            .unwrap();

        assert!(manager.release(session.source_id()));
        assert_eq!(session.subscriber_count(), 0);
        assert!(!manager.is_subscribed(session.source_id()));
    }

    #[test]
    fn test_stale_registration_is_replaced_not_duplicated() {
        let manager = SubscriptionManager::new();
        let client = InMemoryClient::new();
        let sessions = client.manager().clone();

        manager
            .ensure_subscribed(
                &sessions,
                TargetKind::SessionManager,
                noop::<SessionManagerEvent>(),
            )
            .unwrap();
        manager.invalidate();
        assert!(!manager.is_subscribed(sessions.source_id()));
        assert_eq!(manager.count(), 0);
        assert_eq!(sessions.subscriber_count(), 1);

        // Same object after reconnect: the old callback goes, a new one comes.
        assert!(manager
            .ensure_subscribed(
                &sessions,
                TargetKind::SessionManager,
                noop::<SessionManagerEvent>(),
            )
            .unwrap());
        assert_eq!(sessions.subscriber_count(), 1);
        assert_eq!(manager.count_of(TargetKind::SessionManager), 1);
    }

    #[test]
    fn test_prune_stale_keeps_refreshed_records() {
        let manager = SubscriptionManager::new();
        let kept = InMemorySession::new(CorrelationKeys::primary("S1"));
        let gone = InMemorySession::new(CorrelationKeys::primary("S2"));
        for session in [&kept, &gone] {
            manager
                .ensure_subscribed(session, TargetKind::Session, noop::<SessionEvent>())
                .unwrap();
        }

        manager.invalidate();
        manager
            .ensure_subscribed(&kept, TargetKind::Session, noop::<SessionEvent>())
            .unwrap();
        assert_eq!(manager.prune_stale(), 1);

        assert!(manager.is_subscribed(kept.source_id()));
        assert_eq!(kept.subscriber_count(), 1);
        assert_eq!(gone.subscriber_count(), 0);
    }

    #[test]
    fn test_release_all() {
        let manager = SubscriptionManager::new();
        let session = InMemorySession::new(CorrelationKeys::primary("S1"));
        let client = InMemoryClient::new();
        manager
            .ensure_subscribed(&session, TargetKind::Session, noop::<SessionEvent>())
            .unwrap();
        manager
            .ensure_subscribed(
                client.manager(),
                TargetKind::SessionManager,
                noop::<SessionManagerEvent>(),
            )
            .unwrap();

        assert_eq!(manager.release_all(), 2);
        assert_eq!(manager.count(), 0);
        assert_eq!(session.subscriber_count(), 0);
        assert_eq!(client.manager().subscriber_count(), 0);
    }
}
