//! Status transition engine.
//!
//! Applies one hypervisor's operations in `(block, log_index)` order. Each
//! operation turns the affected accounts' latest snapshots into new ones,
//! which are written before the next operation is read.

use super::accounting::{apply_deposit, apply_transfer, apply_withdraw, inherit_elapsed};
use super::fanout::{check_distribution, fan_out, FanoutInputs, FanoutKind};
use super::{enrich, EngineError, PriceResolver};
use crate::datasource::ChainDataProvider;
use crate::db::Repository;
use crate::domain::{
    AccountSnapshot, Address, Cutoff, Decimal, HypervisorStatic, Operation, TokenPrices, Topic,
    VaultSnapshot,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Progress of a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayState {
    pub last_block_processed: i64,
    pub ids_processed: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    OutOfOrder { last_block_processed: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The operation was handled. No-op topics write zero snapshots.
    Applied { snapshots: usize },
    Skipped(SkipReason),
}

/// Replays operations of a single hypervisor against the ledger.
pub struct StatusTransitionEngine {
    repo: Arc<Repository>,
    chain: Arc<dyn ChainDataProvider>,
    prices: PriceResolver,
    hypervisor: HypervisorStatic,
    rewarders: HashSet<Address>,
    fanout_workers: usize,
    state: ReplayState,
}

impl StatusTransitionEngine {
    pub fn new(
        repo: Arc<Repository>,
        chain: Arc<dyn ChainDataProvider>,
        prices: PriceResolver,
        hypervisor: HypervisorStatic,
        rewarders: HashSet<Address>,
        fanout_workers: usize,
    ) -> Self {
        Self {
            repo,
            chain,
            prices,
            hypervisor,
            rewarders,
            fanout_workers,
            state: ReplayState::default(),
        }
    }

    /// Treat `ids` as already applied, e.g. ids found in the ledger from an
    /// interrupted run.
    pub fn with_processed_ids(mut self, ids: HashSet<String>) -> Self {
        self.state.ids_processed.extend(ids);
        self
    }

    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    /// Apply one operation.
    ///
    /// Already processed ids and operations older than the last processed
    /// block are skipped. Any error is fatal for the run: nothing is recorded
    /// for the failing operation and earlier snapshots stay written.
    pub async fn apply(&mut self, operation: &Operation) -> Result<ApplyOutcome, EngineError> {
        if self.state.ids_processed.contains(&operation.id) {
            debug!(id = %operation.id, block = operation.block, "operation already processed");
            return Ok(ApplyOutcome::Skipped(SkipReason::AlreadyProcessed));
        }
        if operation.block < self.state.last_block_processed {
            error!(
                hypervisor = %self.hypervisor.address,
                id = %operation.id,
                block = operation.block,
                last_block_processed = self.state.last_block_processed,
                "operation is older than the last processed block, skipping"
            );
            return Ok(ApplyOutcome::Skipped(SkipReason::OutOfOrder {
                last_block_processed: self.state.last_block_processed,
            }));
        }

        let snapshots = match &operation.topic {
            Topic::Deposit => self.deposit(operation).await?,
            Topic::Withdraw => self.withdraw(operation).await?,
            Topic::Transfer => self.transfer(operation).await?,
            Topic::Rebalance | Topic::ZeroBurn => self.collect_fees(operation).await?,
            Topic::Report => self.report(operation).await?,
            Topic::Approval | Topic::SetFee => 0,
            Topic::Unrecognized(topic) => {
                return Err(EngineError::UnimplementedTopic(topic.clone()));
            }
        };

        self.state.ids_processed.insert(operation.id.clone());
        self.state.last_block_processed = operation.block;
        debug!(
            id = %operation.id,
            topic = operation.topic.as_str(),
            block = operation.block,
            log_index = operation.log_index,
            snapshots,
            "operation applied"
        );
        Ok(ApplyOutcome::Applied { snapshots })
    }

    async fn deposit(&self, operation: &Operation) -> Result<usize, EngineError> {
        let account = required(operation, operation.to.as_ref(), "to")?;
        let amounts = operation.amounts()?;
        let (prices, vault) = self.market_at(operation.block).await?;
        let prior = self.prior_snapshot(account, operation).await?;

        let draft = apply_deposit(&prior, operation, account, &amounts, &prices);
        let total_shares = self.total_shares_with(account, operation, draft.shares_qtty).await?;
        let snapshot = enrich(draft, &prior, &prices, &vault, total_shares);

        self.persist(&[snapshot]).await
    }

    async fn withdraw(&self, operation: &Operation) -> Result<usize, EngineError> {
        let account = required(operation, operation.sender.as_ref(), "sender")?;
        let amounts = operation.amounts()?;
        let (prices, vault) = self.market_at(operation.block).await?;
        let prior = self.prior_snapshot(account, operation).await?;

        let draft = apply_withdraw(&prior, operation, account, &amounts, &prices)?;
        let total_shares = self.total_shares_with(account, operation, draft.shares_qtty).await?;
        let snapshot = enrich(draft, &prior, &prices, &vault, total_shares);

        self.persist(&[snapshot]).await
    }

    async fn transfer(&self, operation: &Operation) -> Result<usize, EngineError> {
        let src = required(operation, operation.src.as_ref(), "src")?;
        let dst = required(operation, operation.dst.as_ref(), "dst")?;
        if src.is_zero() || dst.is_zero() {
            // Mints and burns are accounted by deposit and withdraw.
            return Ok(0);
        }
        if src == dst {
            debug!(id = %operation.id, account = %src, "self transfer, ignoring");
            return Ok(0);
        }
        if self.rewarders.contains(src) || self.rewarders.contains(dst) {
            debug!(id = %operation.id, %src, %dst, "transfer involves a rewarder, ignoring");
            return Ok(0);
        }

        let shares = operation.amounts()?.shares;
        let (prices, vault) = self.market_at(operation.block).await?;
        let prior_src = self.prior_snapshot(src, operation).await?;
        let prior_dst = self.prior_snapshot(dst, operation).await?;

        let (src_draft, mut dst_draft) =
            apply_transfer(&prior_src, &prior_dst, operation, src, dst, shares)?;
        let total_shares = self.supply_or_sum(operation, &vault).await?;

        let source = enrich(src_draft, &prior_src, &prices, &vault, total_shares);
        inherit_elapsed(&mut dst_draft, &source);
        let destination = enrich(dst_draft, &prior_dst, &prices, &vault, total_shares);

        self.persist(&[source, destination]).await
    }

    async fn collect_fees(&self, operation: &Operation) -> Result<usize, EngineError> {
        let amounts = operation.amounts()?;
        if amounts.token0.is_zero() && amounts.token1.is_zero() {
            debug!(id = %operation.id, "no fees collected");
            return Ok(0);
        }

        let vault = self.vault_at(operation.block).await?;
        let total_shares = self.supply_or_sum(operation, &vault).await?;
        if total_shares.is_zero() {
            warn!(
                hypervisor = %self.hypervisor.address,
                block = operation.block,
                fees_token0 = %amounts.token0,
                fees_token1 = %amounts.token1,
                "fees collected with no shares outstanding"
            );
            return Ok(0);
        }

        let kind = FanoutKind::FeeCollection {
            token0: amounts.token0,
            token1: amounts.token1,
        };
        self.distribute(operation, kind, vault, total_shares).await
    }

    async fn report(&self, operation: &Operation) -> Result<usize, EngineError> {
        let vault = self.vault_at(operation.block).await?;
        let total_shares = vault.total_supply;
        self.distribute(operation, FanoutKind::Report, vault, total_shares)
            .await
    }

    /// Run the fan-out over every current shareholder and write the results
    /// in one batch.
    async fn distribute(
        &self,
        operation: &Operation,
        kind: FanoutKind,
        vault: VaultSnapshot,
        total_shares: Decimal,
    ) -> Result<usize, EngineError> {
        let prices = self.prices.prices_at(operation.block).await?;
        let holders: Vec<AccountSnapshot> = self
            .repo
            .last_snapshots_all_accounts(
                &self.hypervisor.address,
                Cutoff::AtOrBefore(operation.position()),
                true,
            )
            .await?
            .into_iter()
            .filter(|s| !s.address.is_zero())
            .collect();
        if holders.is_empty() {
            debug!(id = %operation.id, "no shareholders to update");
            return Ok(0);
        }

        let inputs = Arc::new(FanoutInputs {
            operation: operation.clone(),
            kind,
            prices,
            vault,
            total_shares,
        });
        let outcome = fan_out(Arc::clone(&inputs), holders, self.fanout_workers).await?;
        if matches!(kind, FanoutKind::FeeCollection { .. }) {
            check_distribution(&inputs, &outcome);
        }

        self.persist(&outcome.snapshots).await
    }

    async fn market_at(&self, block: i64) -> Result<(TokenPrices, VaultSnapshot), EngineError> {
        futures::future::try_join(self.prices.prices_at(block), self.vault_at(block)).await
    }

    async fn vault_at(&self, block: i64) -> Result<VaultSnapshot, EngineError> {
        self.chain
            .vault_snapshot(&self.hypervisor.address, block)
            .await?
            .ok_or_else(|| EngineError::MissingVaultSnapshot {
                hypervisor: self.hypervisor.address.clone(),
                block,
            })
    }

    /// Latest snapshot of `account` strictly before `operation`.
    async fn prior_snapshot(
        &self,
        account: &Address,
        operation: &Operation,
    ) -> Result<AccountSnapshot, EngineError> {
        let prior = self
            .repo
            .last_snapshot(
                &self.hypervisor.address,
                account,
                Cutoff::Before(operation.position()),
            )
            .await?;
        Ok(prior.unwrap_or_else(|| {
            AccountSnapshot::empty(self.hypervisor.address.clone(), account.clone())
        }))
    }

    /// Shares of every other account at `operation` plus `account_shares`.
    async fn total_shares_with(
        &self,
        account: &Address,
        operation: &Operation,
        account_shares: Decimal,
    ) -> Result<Decimal, EngineError> {
        let others = self
            .repo
            .total_shares(
                &self.hypervisor.address,
                Cutoff::AtOrBefore(operation.position()),
                Some(account),
            )
            .await?;
        Ok(others + account_shares)
    }

    /// Vault total supply when `operation` is the last of its block, otherwise
    /// the sum of the accounts' latest shares at its position.
    async fn supply_or_sum(
        &self,
        operation: &Operation,
        vault: &VaultSnapshot,
    ) -> Result<Decimal, EngineError> {
        let last = self
            .repo
            .last_log_index(&self.hypervisor.address, operation.block)
            .await?;
        if last == Some(operation.log_index) {
            return Ok(vault.total_supply);
        }
        Ok(self
            .repo
            .total_shares(
                &self.hypervisor.address,
                Cutoff::AtOrBefore(operation.position()),
                None,
            )
            .await?)
    }

    async fn persist(&self, snapshots: &[AccountSnapshot]) -> Result<usize, EngineError> {
        Ok(self.repo.insert_snapshots(snapshots).await?)
    }
}

fn required<'a>(
    operation: &Operation,
    field: Option<&'a Address>,
    name: &str,
) -> Result<&'a Address, EngineError> {
    field.ok_or_else(|| EngineError::MalformedOperation {
        id: operation.id.clone(),
        reason: format!("missing {name} address"),
    })
}
