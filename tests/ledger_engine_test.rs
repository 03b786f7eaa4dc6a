//! Replay scenarios through the status transition engine against a real
//! SQLite ledger.

use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use vaultledger::datasource::{MockChainData, MockPriceSource};
use vaultledger::db::init_db;
use vaultledger::domain::{
    AccountSnapshot, Address, Cutoff, Decimal, HypervisorStatic, Network, Operation, PoolKind,
    Position, TokenInfo, Topic, VaultSnapshot,
};
use vaultledger::engine::{ApplyOutcome, EngineError, PriceResolver, SkipReason, StatusTransitionEngine};
use vaultledger::Repository;

const E18: &str = "000000000000000000";

fn addr(n: u64) -> Address {
    Address::new(format!("0x{:040x}", n))
}

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

/// `whole` tokens as a raw 18-decimals amount.
fn raw18(whole: u64) -> String {
    format!("{}{}", whole, E18)
}

fn hypervisor() -> HypervisorStatic {
    HypervisorStatic {
        address: addr(1),
        network: Network::Ethereum,
        pool_kind: PoolKind::UniswapV3,
        symbol: "xWETH-USDC".to_string(),
        token0: TokenInfo {
            address: addr(10),
            decimals: 18,
        },
        token1: TokenInfo {
            address: addr(11),
            decimals: 6,
        },
        decimals: 18,
    }
}

fn vault(block: i64, supply: &str, total0: &str, total1: &str) -> VaultSnapshot {
    VaultSnapshot {
        hypervisor: addr(1),
        block,
        timestamp: block * 12,
        total_supply: d(supply),
        total_token0: d(total0),
        total_token1: d(total1),
        fees_uncollected_token0: d("0"),
        fees_uncollected_token1: d("0"),
        fees_owed_token0: d("0"),
        fees_owed_token1: d("0"),
    }
}

fn prices() -> MockPriceSource {
    MockPriceSource::new()
        .with_flat_price(Network::Ethereum, addr(10), d("1800"))
        .with_flat_price(Network::Ethereum, addr(11), d("1"))
}

struct Harness {
    repo: Arc<Repository>,
    engine: StatusTransitionEngine,
    _temp: TempDir,
}

async fn setup(chain: MockChainData, source: MockPriceSource) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let engine = StatusTransitionEngine::new(
        repo.clone(),
        Arc::new(chain),
        PriceResolver::new(&hypervisor(), Arc::new(source)),
        hypervisor(),
        HashSet::new(),
        4,
    );
    Harness {
        repo,
        engine,
        _temp: temp_dir,
    }
}

/// Deposit of token0 only, 18 decimals everywhere.
fn deposit(id: &str, block: i64, log_index: i64, to: u64, token0: u64, shares: u64) -> Operation {
    Operation::new(id, Topic::Deposit, addr(1), Position::new(block, log_index), block * 12)
        .with_to(addr(to))
        .with_quantities(raw18(token0), "0")
        .with_shares(raw18(shares))
        .with_decimals(18, 6, 18)
}

async fn latest(repo: &Repository, account: u64) -> AccountSnapshot {
    repo.last_snapshot(&addr(1), &addr(account), Cutoff::latest())
        .await
        .unwrap()
        .expect("account has a snapshot")
}

#[tokio::test]
async fn test_deposit_scenario() {
    let chain = MockChainData::new().with_vault(vault(100, "0.5", "1", "2"));
    let mut h = setup(chain, prices()).await;

    let op = Operation::new("dep", Topic::Deposit, addr(1), Position::new(100, 1), 1_200)
        .with_to(addr(5))
        .with_quantities(format!("1{}", E18), "2000000")
        .with_shares(format!("5{}", &E18[1..]))
        .with_decimals(18, 6, 18);

    let outcome = h.engine.apply(&op).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 1 });

    let snapshot = latest(&h.repo, 5).await;
    assert_eq!(snapshot.investment.token0, d("1"));
    assert_eq!(snapshot.investment.token1, d("2"));
    assert_eq!(snapshot.investment.in_usd, d("1802"));
    assert_eq!(snapshot.shares_qtty, d("0.5"));
    assert_eq!(snapshot.shares_percent, d("1"));
    assert_eq!(snapshot.usd_price_token0, d("1800"));
    assert_eq!(snapshot.tvl.in_usd, d("1802"));
    assert_eq!(snapshot.raw_operation, "dep");
    assert_eq!(snapshot.sec_passed, 0);
}

#[tokio::test]
async fn test_zero_burn_single_holder_collects_all_fees() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "1", "1", "0"),
        vault(110, "1", "1", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("dep", 100, 1, 5, 1, 1)).await.unwrap();

    let zero_burn = Operation::new("zb", Topic::ZeroBurn, addr(1), Position::new(110, 3), 1_320)
        .with_quantities(format!("1{}", &E18[1..]), "0")
        .with_decimals(18, 6, 18);
    let outcome = h.engine.apply(&zero_burn).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 1 });

    let snapshot = latest(&h.repo, 5).await;
    assert_eq!(snapshot.topic, Topic::ZeroBurn);
    assert_eq!(snapshot.fees_collected.token0, d("0.1"));
    assert_eq!(snapshot.fees_collected.in_usd, d("180"));
    assert_eq!(snapshot.shares_qtty, d("1"));
    assert_eq!(snapshot.investment.token0, d("1"));
    assert_eq!(snapshot.sec_passed, 1_320 - 1_200);
}

#[tokio::test]
async fn test_fee_split_is_proportional() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "1", "1", "0"),
        vault(101, "2", "2", "0"),
        vault(102, "4", "4", "0"),
        vault(110, "4", "4", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("a", 100, 0, 5, 1, 1)).await.unwrap();
    h.engine.apply(&deposit("b", 101, 0, 6, 1, 1)).await.unwrap();
    h.engine.apply(&deposit("c", 102, 0, 7, 2, 2)).await.unwrap();

    let rebalance = Operation::new("rb", Topic::Rebalance, addr(1), Position::new(110, 0), 1_320)
        .with_quantities(format!("4{}", &E18[1..]), "0")
        .with_decimals(18, 6, 18);
    let outcome = h.engine.apply(&rebalance).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 3 });

    let mut fees = Vec::new();
    let mut percents = Decimal::zero();
    for account in [5, 6, 7] {
        let snapshot = latest(&h.repo, account).await;
        assert_eq!(snapshot.topic, Topic::Rebalance);
        fees.push(snapshot.fees_collected.token0);
        percents += snapshot.shares_percent;
    }
    assert_eq!(fees, vec![d("0.1"), d("0.1"), d("0.2")]);
    assert_eq!(fees.iter().copied().sum::<Decimal>(), d("0.4"));
    assert_eq!(percents, d("1"));
}

#[tokio::test]
async fn test_out_of_order_operation_is_rejected() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(90, "1", "1", "0"),
        vault(100, "1", "1", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    let first = h.engine.apply(&deposit("late", 100, 0, 5, 1, 1)).await.unwrap();
    assert_eq!(first, ApplyOutcome::Applied { snapshots: 1 });

    let second = h.engine.apply(&deposit("early", 90, 0, 5, 1, 1)).await.unwrap();
    assert_eq!(
        second,
        ApplyOutcome::Skipped(SkipReason::OutOfOrder {
            last_block_processed: 100
        })
    );

    let history = h.repo.account_history(&addr(1), &addr(5), 0, i64::MAX).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].block, 100);
    assert_eq!(history[0].shares_qtty, d("1"));
}

#[tokio::test]
async fn test_replaying_processed_id_changes_nothing() {
    let chain = MockChainData::new().with_vault(vault(100, "1", "1", "0"));
    let mut h = setup(chain, prices()).await;
    let op = deposit("dep", 100, 0, 5, 1, 1);

    h.engine.apply(&op).await.unwrap();
    let before = latest(&h.repo, 5).await;

    assert_eq!(
        h.engine.apply(&op).await.unwrap(),
        ApplyOutcome::Skipped(SkipReason::AlreadyProcessed)
    );

    // A fresh engine seeded from the ledger skips it too.
    let processed = h.repo.processed_operation_ids(&addr(1), 0).await.unwrap();
    let mut fresh = StatusTransitionEngine::new(
        h.repo.clone(),
        Arc::new(MockChainData::new().with_vault(vault(100, "1", "1", "0"))),
        PriceResolver::new(&hypervisor(), Arc::new(prices())),
        hypervisor(),
        HashSet::new(),
        1,
    )
    .with_processed_ids(processed);
    assert_eq!(
        fresh.apply(&op).await.unwrap(),
        ApplyOutcome::Skipped(SkipReason::AlreadyProcessed)
    );

    assert_eq!(latest(&h.repo, 5).await, before);
    let history = h.repo.account_history(&addr(1), &addr(5), 0, i64::MAX).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_transfer_conserves_shares_and_investment() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "4", "4", "0"),
        vault(101, "5", "5", "0"),
        vault(120, "5", "5", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("a", 100, 0, 5, 4, 4)).await.unwrap();
    h.engine.apply(&deposit("b", 101, 0, 6, 1, 1)).await.unwrap();
    let src_before = latest(&h.repo, 5).await;
    let dst_before = latest(&h.repo, 6).await;

    let transfer = Operation::new("t", Topic::Transfer, addr(1), Position::new(120, 2), 1_440)
        .with_transfer(addr(5), addr(6))
        .with_shares(raw18(1))
        .with_decimals(18, 6, 18);
    let outcome = h.engine.apply(&transfer).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 2 });

    let src_after = latest(&h.repo, 5).await;
    let dst_after = latest(&h.repo, 6).await;
    assert_eq!(src_after.shares_qtty, d("3"));
    assert_eq!(dst_after.shares_qtty, d("2"));
    assert_eq!(
        src_before.shares_qtty,
        src_after.shares_qtty + dst_after.shares_qtty - dst_before.shares_qtty
    );
    assert_eq!(
        src_before.investment.in_usd + dst_before.investment.in_usd,
        src_after.investment.in_usd + dst_after.investment.in_usd
    );
    assert_eq!(src_after.investment.token0, d("3"));
    assert_eq!(dst_after.investment.token0, d("2"));
    // Destination adopts the longer holding time of the source.
    assert!(dst_after.sec_passed >= src_after.sec_passed);
}

#[tokio::test]
async fn test_rewarder_transfer_is_ignored() {
    let chain = MockChainData::new().with_vault(vault(100, "1", "1", "0"));
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
    let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));
    let mut engine = StatusTransitionEngine::new(
        repo.clone(),
        Arc::new(chain),
        PriceResolver::new(&hypervisor(), Arc::new(prices())),
        hypervisor(),
        HashSet::from([addr(77)]),
        2,
    );

    engine.apply(&deposit("dep", 100, 0, 5, 1, 1)).await.unwrap();
    let stake = Operation::new("stake", Topic::Transfer, addr(1), Position::new(100, 1), 1_200)
        .with_transfer(addr(5), addr(77))
        .with_shares(raw18(1));
    assert_eq!(
        engine.apply(&stake).await.unwrap(),
        ApplyOutcome::Applied { snapshots: 0 }
    );

    let snapshot = repo
        .last_snapshot(&addr(1), &addr(5), Cutoff::latest())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.shares_qtty, d("1"));
    assert!(repo
        .last_snapshot(&addr(1), &addr(77), Cutoff::latest())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_withdraw_is_proportional() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "4", "4", "0"),
        vault(130, "3", "3", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("dep", 100, 0, 5, 4, 4)).await.unwrap();
    let before = latest(&h.repo, 5).await;

    let withdraw = Operation::new("wd", Topic::Withdraw, addr(1), Position::new(130, 0), 1_560)
        .with_sender(addr(5))
        .with_quantities(raw18(1), "0")
        .with_shares(raw18(1))
        .with_decimals(18, 6, 18);
    h.engine.apply(&withdraw).await.unwrap();

    let after = latest(&h.repo, 5).await;
    let kept = d("0.75");
    assert_eq!(after.shares_qtty, d("3"));
    assert_eq!(after.investment.token0, before.investment.token0 * kept);
    assert_eq!(after.investment.in_usd, before.investment.in_usd * kept);
    assert_eq!(after.divestment_base.token0, d("1"));
    assert!(after.closed_investment_return.token0.is_zero());
    assert_eq!(after.shares_percent, d("1"));
}

#[tokio::test]
async fn test_withdraw_without_shares_is_fatal() {
    let chain = MockChainData::new().with_vault(vault(100, "1", "1", "0"));
    let mut h = setup(chain, prices()).await;

    let withdraw = Operation::new("wd", Topic::Withdraw, addr(1), Position::new(100, 0), 1_200)
        .with_sender(addr(5))
        .with_quantities(raw18(1), "0")
        .with_shares(raw18(1));
    let err = h.engine.apply(&withdraw).await.unwrap_err();

    assert!(matches!(err, EngineError::DivisionByZero { ref account, block: 100, .. } if *account == addr(5)));
    assert!(h
        .repo
        .last_snapshot(&addr(1), &addr(5), Cutoff::latest())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_missing_price_is_fatal() {
    let chain = MockChainData::new().with_vault(vault(100, "1", "1", "0"));
    let only_token0 = MockPriceSource::new().with_flat_price(Network::Ethereum, addr(10), d("1800"));
    let mut h = setup(chain, only_token0).await;

    let err = h.engine.apply(&deposit("dep", 100, 0, 5, 1, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingPrice { ref token, block: 100, .. } if *token == addr(11)));
    assert!(h.engine.state().ids_processed.is_empty());
}

#[tokio::test]
async fn test_report_refreshes_every_holder() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "1", "1", "0"),
        vault(101, "2", "2", "0"),
        vault(200, "2", "4", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("a", 100, 0, 5, 1, 1)).await.unwrap();
    h.engine.apply(&deposit("b", 101, 0, 6, 1, 1)).await.unwrap();

    let report = Operation::report(addr(1), 200, 2_400);
    let outcome = h.engine.apply(&report).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 2 });

    for account in [5, 6] {
        let snapshot = latest(&h.repo, account).await;
        assert_eq!(snapshot.topic, Topic::Report);
        assert_eq!(snapshot.shares_percent, d("0.5"));
        assert_eq!(snapshot.tvl.token0, d("2"));
        assert_eq!(snapshot.investment.token0, d("1"));
        assert_eq!(snapshot.current_result.token0, d("1"));
        assert!(snapshot.fees_collected.token0.is_zero());
    }
}

#[tokio::test]
async fn test_self_transfer_keeps_shares() {
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "4", "4", "0"),
        vault(120, "4", "4", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("a", 100, 0, 5, 4, 4)).await.unwrap();
    let before = latest(&h.repo, 5).await;

    let transfer = Operation::new("self", Topic::Transfer, addr(1), Position::new(120, 0), 1_440)
        .with_transfer(addr(5), addr(5))
        .with_shares(raw18(1))
        .with_decimals(18, 6, 18);
    let outcome = h.engine.apply(&transfer).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 0 });

    let after = latest(&h.repo, 5).await;
    assert_eq!(after, before);
    assert_eq!(after.shares_qtty, d("4"));
    assert_eq!(after.investment.token0, d("4"));
}

#[tokio::test]
async fn test_fee_collection_last_in_block_uses_vault_supply() {
    // The vault reports more shares than the ledger knows about.
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "1", "1", "0"),
        vault(101, "2", "2", "0"),
        vault(110, "4", "4", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("a", 100, 0, 5, 1, 1)).await.unwrap();
    h.engine.apply(&deposit("b", 101, 0, 6, 1, 1)).await.unwrap();

    let zero_burn = Operation::new("zb", Topic::ZeroBurn, addr(1), Position::new(110, 3), 1_320)
        .with_quantities(format!("4{}", &E18[1..]), "0")
        .with_decimals(18, 6, 18);
    let earlier = Operation::new("appr", Topic::Approval, addr(1), Position::new(110, 1), 1_320);
    h.repo
        .insert_operations_batch(&[earlier, zero_burn.clone()])
        .await
        .unwrap();

    let outcome = h.engine.apply(&zero_burn).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 2 });

    for account in [5, 6] {
        let snapshot = latest(&h.repo, account).await;
        assert_eq!(snapshot.shares_percent, d("0.25"));
        assert_eq!(snapshot.fees_collected.token0, d("0.1"));
    }
}

#[tokio::test]
async fn test_transfer_inside_block_uses_ledger_sum() {
    // Supply differs from the ledger sum of 5 shares.
    let chain = MockChainData::new().with_vaults(vec![
        vault(100, "4", "4", "0"),
        vault(101, "5", "5", "0"),
        vault(120, "10", "10", "0"),
    ]);
    let mut h = setup(chain, prices()).await;

    h.engine.apply(&deposit("a", 100, 0, 5, 4, 4)).await.unwrap();
    h.engine.apply(&deposit("b", 101, 0, 6, 1, 1)).await.unwrap();

    let transfer = Operation::new("t", Topic::Transfer, addr(1), Position::new(120, 1), 1_440)
        .with_transfer(addr(5), addr(6))
        .with_shares(raw18(1))
        .with_decimals(18, 6, 18);
    let later = Operation::new("appr", Topic::Approval, addr(1), Position::new(120, 5), 1_440);
    h.repo
        .insert_operations_batch(&[transfer.clone(), later])
        .await
        .unwrap();

    let outcome = h.engine.apply(&transfer).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { snapshots: 2 });

    assert_eq!(latest(&h.repo, 5).await.shares_percent, d("0.6"));
    assert_eq!(latest(&h.repo, 6).await.shares_percent, d("0.4"));
}
