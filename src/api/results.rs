use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{known_hypervisor, AppState};
use crate::domain::{AccountSnapshot, Address, Cutoff, FeeAmounts, Valuation};
use crate::engine::summary::{hypervisor_result, period_summary, total_fees, total_value_locked};
use crate::engine::PeriodSummary;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub block: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub hypervisor: Address,
    pub symbol: String,
    /// Sum of every account's latest snapshot up to the requested block.
    pub result: AccountSnapshot,
    /// Collected, owed and uncollected fees.
    pub total_fees: FeeAmounts,
    pub tvl: Valuation,
}

/// Hypervisor-wide result at `block`, or at the latest ledger entry.
pub async fn get_result(
    Path(hypervisor): Path<String>,
    Query(params): Query<ResultQuery>,
    State(state): State<AppState>,
) -> Result<Json<ResultResponse>, AppError> {
    let hypervisor = known_hypervisor(&state, &hypervisor).await?;
    let block = match params.block {
        Some(block) if block < 0 => {
            return Err(AppError::BadRequest("block must be >= 0".into()));
        }
        Some(block) => block,
        None => i64::MAX,
    };

    let cutoff = Cutoff::end_of_block(block);
    let (result, fees, tvl) = futures::try_join!(
        hypervisor_result(&state.repo, &hypervisor.address, block),
        total_fees(&state.repo, &hypervisor.address, cutoff),
        total_value_locked(&state.repo, &hypervisor.address, cutoff),
    )?;

    Ok(Json(ResultResponse {
        hypervisor: hypervisor.address,
        symbol: hypervisor.symbol,
        result,
        total_fees: fees,
        tvl,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub from_ts: i64,
    pub to_ts: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub hypervisor: Address,
    pub symbol: String,
    /// `null` when the window holds fewer than two results.
    pub summary: Option<PeriodSummary>,
}

pub async fn get_summary(
    Path(hypervisor): Path<String>,
    Query(params): Query<SummaryQuery>,
    State(state): State<AppState>,
) -> Result<Json<SummaryResponse>, AppError> {
    let hypervisor = known_hypervisor(&state, &hypervisor).await?;
    if params.from_ts > params.to_ts {
        return Err(AppError::BadRequest("fromTs must be <= toTs".into()));
    }

    let summary =
        period_summary(&state.repo, &hypervisor.address, params.from_ts, params.to_ts).await?;

    Ok(Json(SummaryResponse {
        hypervisor: hypervisor.address,
        symbol: hypervisor.symbol,
        summary,
    }))
}
