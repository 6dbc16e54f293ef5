//! Session registry under concurrent access

use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tether_core::{EndpointId, Timestamp};
use tether_testkit::FailingEncodeAdaptor;
use tether_transport::{ClientSessionRegistry, JsonAdaptor, Session, TransportAdaptor};

fn adaptor_for(round: usize) -> Arc<dyn TransportAdaptor> {
    if round % 2 == 0 {
        Arc::new(JsonAdaptor)
    } else {
        Arc::new(FailingEncodeAdaptor)
    }
}

#[test]
fn readers_never_observe_torn_sessions() {
    let registry = Arc::new(ClientSessionRegistry::new());
    let endpoint = EndpointId::from("dev-1");
    registry.put(Session::new(
        endpoint.clone(),
        adaptor_for(0),
        Timestamp::from_millis(0),
    ));

    let writer = {
        let registry = registry.clone();
        let endpoint = endpoint.clone();
        thread::spawn(move || {
            for round in 1..500_usize {
                // Even rounds pair the json adaptor with an even timestamp.
                registry.put(Session::new(
                    endpoint.clone(),
                    adaptor_for(round),
                    Timestamp::from_millis(round as u64),
                ));
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            let endpoint = endpoint.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let session = registry.get(&endpoint).unwrap();
                    let even = session.created_at().as_millis() % 2 == 0;
                    let json = session.adaptor().name() == "json";
                    assert_eq!(even, json, "torn session {session:?}");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn idle_sessions_are_evicted_and_touched_ones_kept() {
    let registry = ClientSessionRegistry::new();
    registry.put(Session::new("idle", Arc::new(JsonAdaptor), Timestamp::from_millis(0)));
    registry.put(Session::new("busy", Arc::new(JsonAdaptor), Timestamp::from_millis(0)));

    assert!(registry.touch(&EndpointId::from("busy"), Timestamp::from_millis(9_000)));
    assert!(!registry.touch(&EndpointId::from("ghost"), Timestamp::from_millis(9_000)));

    let evicted = registry.evict_idle(Timestamp::from_millis(10_000), Duration::from_secs(5));
    assert_eq!(evicted, vec![EndpointId::from("idle")]);
    assert!(registry.get(&EndpointId::from("busy")).is_some());
    assert!(registry.get(&EndpointId::from("idle")).is_none());
}

proptest! {
    /// After any interleaving of puts and removes the registry holds exactly
    /// the endpoints whose last operation was a put.
    #[test]
    fn registry_matches_last_write(ops in prop::collection::vec((0u8..6, any::<bool>()), 0..40)) {
        let registry = ClientSessionRegistry::new();
        let mut expected = std::collections::BTreeSet::new();
        for (slot, insert) in ops {
            let endpoint = EndpointId::new(format!("dev-{slot}"));
            if insert {
                registry.put(Session::new(endpoint.clone(), Arc::new(JsonAdaptor), Timestamp::ZERO));
                expected.insert(endpoint);
            } else {
                registry.remove(&endpoint);
                expected.remove(&endpoint);
            }
        }
        let mut actual: Vec<EndpointId> = registry
            .get_all()
            .into_iter()
            .map(|s| s.endpoint().clone())
            .collect();
        actual.sort();
        prop_assert_eq!(actual, expected.into_iter().collect::<Vec<_>>());
    }
}
