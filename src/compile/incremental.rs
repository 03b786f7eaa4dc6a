//! Incremental replay of a hypervisor's operations into the ledger.

use super::{sequencer, CompileOutcome, CompileSettings};
use crate::datasource::{ChainDataProvider, PriceSource};
use crate::db::Repository;
use crate::domain::{Address, Cutoff, HypervisorStatic, Network};
use crate::engine::summary::share_percent_check;
use crate::engine::{ApplyOutcome, EngineError, PriceResolver, StatusTransitionEngine};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Replays stored operations of hypervisors, resuming from ledger contents.
pub struct Compiler {
    repo: Arc<Repository>,
    chain: Arc<dyn ChainDataProvider>,
    prices: Arc<dyn PriceSource>,
    settings: CompileSettings,
    network_rewarders: HashMap<Network, Vec<Address>>,
}

impl Compiler {
    pub fn new(
        repo: Arc<Repository>,
        chain: Arc<dyn ChainDataProvider>,
        prices: Arc<dyn PriceSource>,
        settings: CompileSettings,
    ) -> Self {
        Self {
            repo,
            chain,
            prices,
            settings,
            network_rewarders: HashMap::new(),
        }
    }

    /// Staking contracts per network whose share transfers are ignored.
    pub fn with_rewarders(mut self, network_rewarders: HashMap<Network, Vec<Address>>) -> Self {
        self.network_rewarders = network_rewarders;
        self
    }

    /// Replay everything not yet in the ledger for `hypervisor`.
    ///
    /// # Errors
    /// The first fatal engine error stops the run. Snapshots written before it
    /// are kept and the next run resumes from them.
    pub async fn compile_hypervisor(
        &self,
        hypervisor: &HypervisorStatic,
    ) -> Result<CompileOutcome, EngineError> {
        let address = &hypervisor.address;
        let Some(plan) =
            sequencer::plan(&self.repo, address, self.settings.report_proximity_blocks).await?
        else {
            return Ok(CompileOutcome::default());
        };

        let rewarders = self.rewarders_for(hypervisor).await?;

        let mut prices = PriceResolver::new(hypervisor, Arc::clone(&self.prices));
        if let Some((min_block, max_block)) = self.repo.status_block_range(address).await? {
            let from_block = min_block.max(plan.resume_block);
            if from_block <= max_block {
                prices.prefetch(from_block, max_block).await?;
            }
        }

        let processed = self
            .repo
            .processed_operation_ids(address, plan.resume_block)
            .await?;
        debug!(%address, processed = processed.len(), "preloaded processed operation ids");

        let mut engine = StatusTransitionEngine::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.chain),
            prices,
            hypervisor.clone(),
            rewarders,
            self.settings.fanout_workers,
        )
        .with_processed_ids(processed);

        let mut outcome = CompileOutcome {
            resume_block: Some(plan.resume_block),
            ..Default::default()
        };
        for operation in &plan.operations {
            match engine.apply(operation).await? {
                ApplyOutcome::Applied { snapshots } => {
                    outcome.applied += 1;
                    outcome.snapshots_written += snapshots;
                }
                ApplyOutcome::Skipped(_) => outcome.skipped += 1,
            }
        }

        share_percent_check(&self.repo, address, Cutoff::latest()).await?;

        info!(
            hypervisor = %address,
            symbol = %hypervisor.symbol,
            resume_block = plan.resume_block,
            applied = outcome.applied,
            skipped = outcome.skipped,
            reports = plan.reports,
            snapshots = outcome.snapshots_written,
            "hypervisor replayed"
        );
        Ok(outcome)
    }

    /// Configured rewarders of the hypervisor's network plus the ones stored
    /// for the hypervisor itself.
    async fn rewarders_for(
        &self,
        hypervisor: &HypervisorStatic,
    ) -> Result<HashSet<Address>, EngineError> {
        let mut rewarders: HashSet<Address> = self
            .network_rewarders
            .get(&hypervisor.network)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        rewarders.extend(self.repo.rewarders_for(&hypervisor.address).await?);
        Ok(rewarders)
    }
}
