use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the ledger database answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.repo.ping().await?;
    let networks: Vec<&str> = state.config.networks.iter().map(|n| n.as_str()).collect();
    Ok(Json(serde_json::json!({"status": "ready", "networks": networks})))
}
