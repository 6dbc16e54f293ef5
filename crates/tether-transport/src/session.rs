//! Per-device transport sessions
//!
//! The registry is the only owner of [`Session`] state. Entries are replaced
//! whole, never mutated in place by callers, so a concurrent reader observes
//! either the old session or the new one. Other components keep the
//! [`EndpointId`] and look the session up when they need it.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{EndpointId, Timestamp};

use crate::adaptor::TransportAdaptor;
use crate::telemetry::TRANSPORT_TELEMETRY;

/// One registered device endpoint
#[derive(Clone)]
pub struct Session {
    endpoint: EndpointId,
    adaptor: Arc<dyn TransportAdaptor>,
    created_at: Timestamp,
    last_seen: Timestamp,
}

impl Session {
    /// Create a session first seen at `now`
    pub fn new(
        endpoint: impl Into<EndpointId>,
        adaptor: Arc<dyn TransportAdaptor>,
        now: Timestamp,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            adaptor,
            created_at: now,
            last_seen: now,
        }
    }

    /// Endpoint identity
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Wire-format capability for this device
    pub fn adaptor(&self) -> &Arc<dyn TransportAdaptor> {
        &self.adaptor
    }

    /// Registration time
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Time of the most recent exchange
    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    /// Copy of this session with `last_seen` moved forward to `now`
    pub fn touched(&self, now: Timestamp) -> Self {
        Self {
            last_seen: self.last_seen.max(now),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("adaptor", &self.adaptor.name())
            .field("created_at", &self.created_at)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

/// Concurrent endpoint → session map
#[derive(Debug, Default)]
pub struct ClientSessionRegistry {
    sessions: DashMap<EndpointId, Session>,
}

impl ClientSessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Session registered for `endpoint`
    pub fn get(&self, endpoint: &EndpointId) -> Option<Session> {
        self.sessions.get(endpoint).map(|entry| entry.value().clone())
    }

    /// Snapshot of every session; later registry changes do not affect it
    pub fn get_all(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Insert or replace the session for its endpoint, returning the replaced one
    pub fn put(&self, session: Session) -> Option<Session> {
        let endpoint = session.endpoint().clone();
        let previous = self.sessions.insert(endpoint.clone(), session);
        TRANSPORT_TELEMETRY.log_session_put(&endpoint, previous.is_some());
        previous
    }

    /// Remove the session for `endpoint`; absent endpoints are a no-op
    pub fn remove(&self, endpoint: &EndpointId) -> Option<Session> {
        let removed = self.sessions.remove(endpoint).map(|(_, session)| session);
        if removed.is_some() {
            TRANSPORT_TELEMETRY.log_session_removed(endpoint, "deregistered");
        }
        removed
    }

    /// Record activity on `endpoint`; returns false when it is not registered
    pub fn touch(&self, endpoint: &EndpointId, now: Timestamp) -> bool {
        match self.sessions.get_mut(endpoint) {
            Some(mut entry) => {
                let updated = entry.touched(now);
                *entry = updated;
                true
            }
            None => false,
        }
    }

    /// Remove sessions idle for longer than `max_idle`, returning their endpoints
    pub fn evict_idle(&self, now: Timestamp, max_idle: Duration) -> Vec<EndpointId> {
        let cutoff = now.saturating_sub(max_idle);
        let mut evicted = Vec::new();
        self.sessions.retain(|endpoint, session| {
            let keep = session.last_seen() >= cutoff;
            if !keep {
                evicted.push(endpoint.clone());
            }
            keep
        });
        for endpoint in &evicted {
            TRANSPORT_TELEMETRY.log_session_removed(endpoint, "idle");
        }
        evicted
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::JsonAdaptor;

    fn session(name: &str, at: u64) -> Session {
        Session::new(name, Arc::new(JsonAdaptor), Timestamp::from_millis(at))
    }

    #[test]
    fn put_replaces_existing_entry() {
        let registry = ClientSessionRegistry::new();
        assert!(registry.put(session("dev-1", 1)).is_none());
        let replaced = registry.put(session("dev-1", 2)).unwrap();

        assert_eq!(replaced.created_at(), Timestamp::from_millis(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&"dev-1".into()).unwrap().created_at(),
            Timestamp::from_millis(2)
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ClientSessionRegistry::new();
        registry.put(session("dev-1", 0));
        assert!(registry.remove(&"dev-1".into()).is_some());
        assert!(registry.remove(&"dev-1".into()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_all_is_a_snapshot() {
        let registry = ClientSessionRegistry::new();
        registry.put(session("a", 0));
        registry.put(session("b", 0));

        let snapshot = registry.get_all();
        registry.remove(&"a".into());
        registry.put(session("c", 0));

        let mut names: Vec<_> = snapshot.iter().map(|s| s.endpoint().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn touch_moves_last_seen_forward_only() {
        let registry = ClientSessionRegistry::new();
        registry.put(session("dev-1", 100));

        assert!(registry.touch(&"dev-1".into(), Timestamp::from_millis(500)));
        assert!(registry.touch(&"dev-1".into(), Timestamp::from_millis(200)));
        assert!(!registry.touch(&"ghost".into(), Timestamp::from_millis(500)));

        let current = registry.get(&"dev-1".into()).unwrap();
        assert_eq!(current.created_at(), Timestamp::from_millis(100));
        assert_eq!(current.last_seen(), Timestamp::from_millis(500));
    }

    #[test]
    fn evict_idle_removes_only_stale_sessions() {
        let registry = ClientSessionRegistry::new();
        registry.put(session("old", 0));
        registry.put(session("fresh", 9_000));

        let evicted = registry.evict_idle(Timestamp::from_millis(10_000), Duration::from_secs(5));

        assert_eq!(evicted, vec![EndpointId::from("old")]);
        assert!(registry.get(&"fresh".into()).is_some());
        assert!(registry.get(&"old".into()).is_none());
    }
}
