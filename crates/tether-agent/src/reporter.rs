//! Periodic stats reporting

use std::sync::Arc;
use tether_core::{StatsRegistry, StatsSnapshot};

/// Logs and resets every registered counter set
#[derive(Debug, Clone)]
pub struct StatsReporter {
    registry: Arc<StatsRegistry>,
}

impl StatsReporter {
    /// Reporter over `registry`
    pub fn new(registry: Arc<StatsRegistry>) -> Self {
        Self { registry }
    }

    /// Take (read and reset) every counter set and log it
    pub fn report(&self) -> Vec<StatsSnapshot> {
        let snapshots = self.registry.take_all();
        for snapshot in &snapshots {
            tracing::info!(
                operation = "stats_report",
                name = %snapshot.name,
                total = snapshot.total,
                successful = snapshot.successful,
                failed = snapshot.failed,
                "message stats"
            );
        }
        snapshots
    }
}
