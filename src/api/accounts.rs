use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{known_hypervisor, parse_address, AppState};
use crate::domain::{AccountSnapshot, Address};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHistoryQuery {
    pub from_block: Option<i64>,
    pub to_block: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHistoryResponse {
    pub hypervisor: Address,
    pub account: Address,
    pub snapshot_count: usize,
    pub snapshots: Vec<AccountSnapshot>,
}

pub async fn get_account_history(
    Path((hypervisor, account)): Path<(String, String)>,
    Query(params): Query<AccountHistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<AccountHistoryResponse>, AppError> {
    let hypervisor = known_hypervisor(&state, &hypervisor).await?;
    let account = parse_address(&account, "account")?;

    let from_block = params.from_block.unwrap_or(0);
    let to_block = params.to_block.unwrap_or(i64::MAX);
    if from_block > to_block {
        return Err(AppError::BadRequest("fromBlock must be <= toBlock".into()));
    }

    let snapshots = state
        .repo
        .account_history(&hypervisor.address, &account, from_block, to_block)
        .await?;

    Ok(Json(AccountHistoryResponse {
        hypervisor: hypervisor.address,
        account,
        snapshot_count: snapshots.len(),
        snapshots,
    }))
}
