pub mod accounts;
pub mod health;
pub mod results;

use crate::config::Config;
use crate::db::Repository;
use crate::domain::{Address, HypervisorStatic};
use crate::error::AppError;
use axum::{routing::get, Router};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config) -> Self {
        Self { repo, config }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/hypervisors/:address/accounts/:account",
            get(accounts::get_account_history),
        )
        .route("/v1/hypervisors/:address/result", get(results::get_result))
        .route("/v1/hypervisors/:address/summary", get(results::get_summary))
        .layer(cors)
        .with_state(state)
}

pub(crate) fn parse_address(raw: &str, what: &str) -> Result<Address, AppError> {
    Address::from_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid {} address", what)))
}

/// Static data of a stored hypervisor, or `NotFound`.
pub(crate) async fn known_hypervisor(
    state: &AppState,
    raw: &str,
) -> Result<HypervisorStatic, AppError> {
    let address = parse_address(raw, "hypervisor")?;
    state
        .repo
        .get_hypervisor(&address)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Unknown hypervisor {}", address)))
}
