use crate::compile::Compiler;
use crate::db::Repository;
use crate::domain::Network;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Runs the compiler over every stored hypervisor of the configured networks.
pub struct Orchestrator {
    compiler: Compiler,
    repo: Arc<Repository>,
    networks: Vec<Network>,
    run_interval: Duration,
}

/// Counts of one pass over a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRunSummary {
    pub network: Network,
    pub hypervisors: usize,
    pub replayed: usize,
    pub idle: usize,
    pub failed: usize,
    pub snapshots_written: usize,
}

impl NetworkRunSummary {
    fn new(network: Network) -> Self {
        Self {
            network,
            hypervisors: 0,
            replayed: 0,
            idle: 0,
            failed: 0,
            snapshots_written: 0,
        }
    }
}

impl Orchestrator {
    pub fn new(
        compiler: Compiler,
        repo: Arc<Repository>,
        networks: Vec<Network>,
        run_interval: Duration,
    ) -> Self {
        Self {
            compiler,
            repo,
            networks,
            run_interval,
        }
    }

    /// Replay every hypervisor of `network`, one after the other.
    ///
    /// A fatal error for one hypervisor is logged and the next one proceeds.
    pub async fn run_network(
        &self,
        network: Network,
    ) -> Result<NetworkRunSummary, OrchestrationError> {
        let hypervisors = self.repo.list_hypervisors(network).await?;
        let mut summary = NetworkRunSummary::new(network);
        summary.hypervisors = hypervisors.len();

        for hypervisor in &hypervisors {
            match self.compiler.compile_hypervisor(hypervisor).await {
                Ok(outcome) if outcome.is_idle() => summary.idle += 1,
                Ok(outcome) => {
                    summary.replayed += 1;
                    summary.snapshots_written += outcome.snapshots_written;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        %network,
                        hypervisor = %hypervisor.address,
                        symbol = %hypervisor.symbol,
                        error = %e,
                        "hypervisor replay stopped"
                    );
                }
            }
        }

        info!(
            %network,
            hypervisors = summary.hypervisors,
            replayed = summary.replayed,
            idle = summary.idle,
            failed = summary.failed,
            snapshots = summary.snapshots_written,
            "network run finished"
        );
        Ok(summary)
    }

    /// One pass over all configured networks.
    pub async fn run_once(&self) -> Vec<NetworkRunSummary> {
        let mut summaries = Vec::with_capacity(self.networks.len());
        for network in &self.networks {
            match self.run_network(*network).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!(%network, error = %e, "network run failed"),
            }
        }
        summaries
    }

    /// Run a pass every `run_interval`, starting immediately.
    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.run_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
