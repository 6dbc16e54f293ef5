//! Configuration loading and counter property tests

use proptest::prelude::*;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tether_core::{MessagesStats, StatCounters, TetherConfig, TetherError};

// ============================================================================
// Configuration files
// ============================================================================

#[test]
fn load_from_file_reads_all_sections() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[correlator]
default_timeout_ms = 2500
finalized_retention_ms = 1000

[sessions]
idle_timeout_ms = 30000

[stats]
report_interval_ms = 15000
"#
    )
    .unwrap();

    let config = TetherConfig::load_from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.correlator.default_timeout_ms, 2_500);
    assert_eq!(config.correlator.finalized_retention_ms, 1_000);
    assert_eq!(config.sessions.idle_timeout_ms, 30_000);
    assert_eq!(config.stats.report_interval_ms, 15_000);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = TetherConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, TetherError::Config { .. }));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = TetherConfig::from_toml_str("[correlator\ndefault_timeout_ms = ").unwrap_err();
    assert!(matches!(err, TetherError::Config { .. }));
}

// ============================================================================
// Counters
// ============================================================================

proptest! {
    #[test]
    fn increments_are_order_independent(amounts in prop::collection::vec(0u64..1_000, 0..64)) {
        let forward = StatCounters::new("forward");
        let backward = StatCounters::new("backward");

        for amount in &amounts {
            forward.increment_successful_by(*amount);
        }
        for amount in amounts.iter().rev() {
            backward.increment_successful_by(*amount);
        }

        prop_assert_eq!(forward.successful(), backward.successful());
        prop_assert_eq!(forward.successful(), amounts.iter().sum::<u64>());
    }
}

#[test]
fn concurrent_totals_do_not_survive_reset() {
    let stats = Arc::new(StatCounters::new("uplink"));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let stats = Arc::clone(&stats);
            thread::spawn(move || stats.increment_total_by(1))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    stats.reset();
    assert_eq!(stats.total(), 0);

    // One admitted item, processed successfully, in the new window.
    stats.increment_total();
    stats.increment_successful();

    assert_eq!(
        (stats.total(), stats.successful(), stats.failed()),
        (1, 1, 0)
    );
}
