//! Agent assembly and background task wiring

use parking_lot::Mutex;
use std::sync::Arc;
use tether_core::{Clock, StatsRegistry, TetherConfig};
use tether_ledger::{InstrumentedLedger, MemoryRpcCallLedger, RpcCallLedger};
use tether_transport::{ClientSessionRegistry, PendingExchangeCorrelator};
use tokio::sync::mpsc;

use crate::dispatcher::{ResultDispatcher, ResultEvent};
use crate::reporter::StatsReporter;
use crate::service::{DeviceRpcService, ForwardedRequest};
use crate::sweeper::Sweeper;
use crate::task_registry::TaskRegistry;

/// Capacity of the request and result channels
pub const PIPELINE_CAPACITY: usize = 1024;

/// The processing pipeline's side of the agent's channels
#[derive(Debug)]
pub struct PipelineEnds {
    /// Admitted requests
    pub requests: mpsc::Receiver<ForwardedRequest>,
    /// Where results are sent back
    pub results: mpsc::Sender<ResultEvent>,
}

/// A fully wired device RPC agent
pub struct TetherAgent {
    config: TetherConfig,
    stats: Arc<StatsRegistry>,
    service: Arc<DeviceRpcService>,
    dispatcher: Arc<ResultDispatcher>,
    sweeper: Arc<Sweeper>,
    reporter: StatsReporter,
    tasks: TaskRegistry,
    results: Mutex<Option<mpsc::Receiver<ResultEvent>>>,
}

impl TetherAgent {
    /// Agent backed by an in-memory ledger
    pub fn new(config: TetherConfig, clock: Arc<dyn Clock>) -> (Self, PipelineEnds) {
        let stats = Arc::new(StatsRegistry::new());
        let ledger = InstrumentedLedger::new(
            MemoryRpcCallLedger::new(clock.clone(), &config.ledger),
            stats.counters("rpc_ledger"),
        );
        Self::assemble(config, clock, Arc::new(ledger), stats)
    }

    /// Agent recording calls into `ledger`
    pub fn with_ledger(
        config: TetherConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn RpcCallLedger>,
    ) -> (Self, PipelineEnds) {
        Self::assemble(config, clock, ledger, Arc::new(StatsRegistry::new()))
    }

    fn assemble(
        config: TetherConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn RpcCallLedger>,
        stats: Arc<StatsRegistry>,
    ) -> (Self, PipelineEnds) {
        let (requests_tx, requests_rx) = mpsc::channel(PIPELINE_CAPACITY);
        let (results_tx, results_rx) = mpsc::channel(PIPELINE_CAPACITY);

        let sessions = Arc::new(ClientSessionRegistry::new());
        let correlator = Arc::new(
            PendingExchangeCorrelator::new(sessions.clone(), clock.clone(), &config.correlator)
                .with_stats(stats.counters("correlator")),
        );
        let service = Arc::new(DeviceRpcService::new(
            sessions,
            correlator,
            ledger,
            clock.clone(),
            requests_tx,
        ));
        let dispatcher = Arc::new(ResultDispatcher::new(
            &service,
            stats.counters("dispatcher"),
        ));
        let sweeper = Arc::new(Sweeper::new(service.clone(), clock, &config));
        let reporter = StatsReporter::new(stats.clone());

        let agent = Self {
            config,
            stats,
            service,
            dispatcher,
            sweeper,
            reporter,
            tasks: TaskRegistry::new(),
            results: Mutex::new(Some(results_rx)),
        };
        let ends = PipelineEnds {
            requests: requests_rx,
            results: results_tx,
        };
        (agent, ends)
    }

    /// Admission service for transport front-ends
    pub fn service(&self) -> &Arc<DeviceRpcService> {
        &self.service
    }

    /// Result dispatcher
    pub fn dispatcher(&self) -> &Arc<ResultDispatcher> {
        &self.dispatcher
    }

    /// Cleanup passes
    pub fn sweeper(&self) -> &Arc<Sweeper> {
        &self.sweeper
    }

    /// Every counter set the agent reports
    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Start the dispatcher and the periodic sweeps; later calls are no-ops
    pub fn start(&self) {
        let Some(results) = self.results.lock().take() else {
            return;
        };
        self.tasks.spawn(self.dispatcher.clone().run(results));

        let sweeper = self.sweeper.clone();
        self.tasks
            .spawn_interval_until(self.config.correlator.sweep_interval(), move || {
                let sweeper = sweeper.clone();
                async move {
                    sweeper.sweep_exchanges().await;
                    sweeper.evict_idle_sessions();
                    true
                }
            });

        if self.config.ledger.ttl().is_some() {
            let sweeper = self.sweeper.clone();
            self.tasks
                .spawn_interval_until(self.config.ledger.cleanup_interval(), move || {
                    let sweeper = sweeper.clone();
                    async move {
                        if let Err(err) = sweeper.cleanup_ledger().await {
                            tracing::warn!(
                                operation = "cleanup_ledger",
                                error = %err,
                                "ledger cleanup failed"
                            );
                        }
                        true
                    }
                });
        }

        if self.config.stats.enabled {
            let reporter = self.reporter.clone();
            self.tasks
                .spawn_interval_until(self.config.stats.report_interval(), move || {
                    let reporter = reporter.clone();
                    async move {
                        reporter.report();
                        true
                    }
                });
        }

        tracing::info!(
            operation = "agent_start",
            sweep_interval_ms = self.config.correlator.sweep_interval_ms,
            default_timeout_ms = self.config.correlator.default_timeout_ms,
            "tether agent started"
        );
    }

    /// Stop every background task
    pub fn shutdown(&self) {
        self.tasks.shutdown();
        tracing::info!(operation = "agent_shutdown", "tether agent stopped");
    }
}

impl std::fmt::Debug for TetherAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherAgent")
            .field("service", &self.service)
            .field("tasks", &self.tasks)
            .finish()
    }
}

/// Loopback pipeline: answers every request with its own parameters.
///
/// Stands in for a rule engine when the agent runs on its own.
pub async fn run_echo_pipeline(
    mut requests: mpsc::Receiver<ForwardedRequest>,
    results: mpsc::Sender<ResultEvent>,
) {
    while let Some(forwarded) = requests.recv().await {
        let event = ResultEvent::reply(forwarded.key, forwarded.request.params);
        if results.send(event).await.is_err() {
            break;
        }
    }
}
