use crate::security::service_error;
use crate::AppState;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    instance_id: String,
    views: usize,
    zones: usize,
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, Response> {
    let views = state.db.list_views().map_err(service_error)?;
    let zones = state.db.list_zones().map_err(service_error)?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.instance_id.clone(),
        views: views.len(),
        zones: zones.len(),
    }))
}
