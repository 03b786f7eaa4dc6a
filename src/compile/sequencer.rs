//! Replay planning: where a run resumes and which synthetic reports it adds.

use super::ReplayPlan;
use crate::db::Repository;
use crate::domain::{sort_operations, Address, Operation};
use chrono::TimeZone;
use std::collections::HashSet;
use tracing::{debug, warn};

/// First operation block not yet reflected in the ledger.
///
/// The most recent ledger block is treated as unprocessed, since an
/// interrupted run may have written only part of it. Both slices are
/// ascending.
pub fn resume_block(ledger_blocks: &[i64], operation_blocks: &[i64]) -> Option<i64> {
    let done_until = ledger_blocks.len().saturating_sub(1);
    let done: HashSet<i64> = ledger_blocks[..done_until].iter().copied().collect();
    operation_blocks
        .iter()
        .copied()
        .find(|block| !done.contains(block))
}

/// First `(block, timestamp)` status point of every UTC day.
pub fn daily_status_points(status_points: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut days = HashSet::new();
    let mut firsts = Vec::new();
    for &(block, timestamp) in status_points {
        let Some(dt) = chrono::Utc.timestamp_opt(timestamp, 0).single() else {
            warn!(block, timestamp, "vault status with invalid timestamp");
            continue;
        };
        if days.insert(dt.date_naive()) {
            firsts.push((block, timestamp));
        }
    }
    firsts
}

/// Daily report candidates at or after `from_block` that are more than
/// `proximity` blocks away from every operation and ledger block.
pub fn schedule_reports(
    status_points: &[(i64, i64)],
    operation_blocks: &[i64],
    ledger_blocks: &[i64],
    from_block: i64,
    proximity: i64,
) -> Vec<(i64, i64)> {
    let mut occupied: Vec<i64> = operation_blocks
        .iter()
        .chain(ledger_blocks)
        .copied()
        .collect();
    occupied.sort_unstable();
    occupied.dedup();

    daily_status_points(status_points)
        .into_iter()
        .filter(|&(block, _)| block >= from_block)
        .filter(|&(block, _)| match nearest_distance(&occupied, block) {
            Some(distance) => distance > proximity,
            None => true,
        })
        .collect()
}

/// Distance from `block` to the closest entry of the sorted `blocks`.
fn nearest_distance(blocks: &[i64], block: i64) -> Option<i64> {
    match blocks.binary_search(&block) {
        Ok(_) => Some(0),
        Err(i) => {
            let after = blocks.get(i).map(|b| b - block);
            let before = i.checked_sub(1).and_then(|j| blocks.get(j)).map(|b| block - b);
            match (before, after) {
                (Some(b), Some(a)) => Some(b.min(a)),
                (b, a) => b.or(a),
            }
        }
    }
}

/// Build the replay plan of one hypervisor.
///
/// Without new operations, a run still replays reports due after the last
/// ledger block. Returns `None` when there is nothing to do.
pub async fn plan(
    repo: &Repository,
    hypervisor: &Address,
    proximity: i64,
) -> Result<Option<ReplayPlan>, sqlx::Error> {
    let ledger_blocks = repo.ledger_blocks(hypervisor).await?;
    let operation_blocks = repo.qualifying_operation_blocks(hypervisor).await?;

    let resume = resume_block(&ledger_blocks, &operation_blocks);
    let from_block = match (resume, ledger_blocks.last()) {
        (Some(block), _) => block,
        (None, Some(last)) => last + 1,
        (None, None) => {
            debug!(%hypervisor, "no operations to replay");
            return Ok(None);
        }
    };

    let mut operations = match resume {
        Some(block) => repo.query_operations_since(hypervisor, block).await?,
        None => Vec::new(),
    };

    let status_points = repo.vault_status_points(hypervisor).await?;
    let reports = schedule_reports(
        &status_points,
        &operation_blocks,
        &ledger_blocks,
        from_block,
        proximity,
    );
    if operations.is_empty() && reports.is_empty() {
        return Ok(None);
    }

    let report_count = reports.len();
    operations.extend(
        reports
            .into_iter()
            .map(|(block, timestamp)| Operation::report(hypervisor.clone(), block, timestamp)),
    );
    sort_operations(&mut operations);

    debug!(
        %hypervisor,
        resume_block = from_block,
        operations = operations.len(),
        reports = report_count,
        "replay planned"
    );
    Ok(Some(ReplayPlan {
        resume_block: from_block,
        operations,
        reports: report_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;

    #[test]
    fn test_resume_on_empty_ledger() {
        assert_eq!(resume_block(&[], &[100, 120]), Some(100));
        assert_eq!(resume_block(&[], &[]), None);
    }

    #[test]
    fn test_resume_reprocesses_last_ledger_block() {
        // 120 was the last block written, so it may be partial.
        assert_eq!(resume_block(&[100, 120], &[100, 120, 130]), Some(120));
        assert_eq!(resume_block(&[100, 110, 120], &[100, 120]), Some(120));
    }

    #[test]
    fn test_resume_finds_gaps() {
        assert_eq!(resume_block(&[100, 120, 140], &[100, 110, 120, 140]), Some(110));
    }

    #[test]
    fn test_nothing_to_resume() {
        assert_eq!(resume_block(&[100, 120], &[100]), None);
    }

    #[test]
    fn test_daily_points_take_first_of_day() {
        let points = [(10, 0), (20, 3_600), (30, DAY), (40, DAY + 5), (50, 3 * DAY)];
        assert_eq!(
            daily_status_points(&points),
            vec![(10, 0), (30, DAY), (50, 3 * DAY)]
        );
    }

    #[test]
    fn test_reports_respect_resume_and_proximity() {
        let points = [(1_000, 0), (2_000, DAY), (3_000, 2 * DAY), (4_000, 3 * DAY)];
        let operation_blocks = [1_000, 2_010];
        let ledger_blocks = [1_000];

        let reports = schedule_reports(&points, &operation_blocks, &ledger_blocks, 1_500, 30);

        // 1000 is before the resume block, 2000 is 10 blocks from an operation.
        assert_eq!(reports, vec![(3_000, 2 * DAY), (4_000, 3 * DAY)]);
    }

    #[test]
    fn test_reports_skip_occupied_blocks() {
        let points = [(1_000, 0), (2_000, DAY)];
        let reports = schedule_reports(&points, &[2_000], &[], 0, 0);
        assert_eq!(reports, vec![(1_000, 0)]);
    }

    #[test]
    fn test_nearest_distance() {
        assert_eq!(nearest_distance(&[], 5), None);
        assert_eq!(nearest_distance(&[10, 20], 14), Some(4));
        assert_eq!(nearest_distance(&[10, 20], 25), Some(5));
        assert_eq!(nearest_distance(&[10, 20], 2), Some(8));
        assert_eq!(nearest_distance(&[10, 20], 20), Some(0));
    }
}
