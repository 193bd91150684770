use crate::security::{not_found, service_error, Pagination};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use dnsviews_consistency::ViewRegistry;
use dnsviews_core::types::IpAddress;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::info;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/addresses", get(list_addresses).post(create_address))
        .route(
            "/addresses/{id}",
            get(get_address).put(update_address).delete(delete_address),
        )
}

#[derive(Serialize)]
struct AddressResponse {
    id: Uuid,
    address: IpAddr,
    dns_name: Option<String>,
    /// Names of the views currently governing the address
    views: Vec<String>,
    created_at: String,
}

impl AddressResponse {
    fn build(state: &AppState, address: IpAddress) -> Result<Self, Response> {
        let views = state
            .db
            .effective_views(address.address)
            .map_err(service_error)?
            .into_iter()
            .map(|v| v.name)
            .collect();
        Ok(Self {
            id: address.id,
            address: address.address,
            dns_name: address.dns_name,
            views,
            created_at: address.created_at.to_rfc3339(),
        })
    }
}

#[derive(Deserialize)]
struct CreateAddressRequest {
    address: IpAddr,
    #[serde(default)]
    dns_name: Option<String>,
}

#[derive(Deserialize)]
struct UpdateAddressRequest {
    dns_name: Option<String>,
}

async fn list_addresses(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<AddressResponse>>, Response> {
    let addresses = state.db.list_addresses().map_err(service_error)?;
    let response = page
        .apply(addresses)
        .into_iter()
        .map(|a| AddressResponse::build(&state, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(response))
}

async fn create_address(
    State(state): State<AppState>,
    Json(req): Json<CreateAddressRequest>,
) -> Result<(StatusCode, Json<AddressResponse>), Response> {
    let address = IpAddress::new(req.address, req.dns_name.as_deref());
    state
        .reconciler()
        .save_address(&state.db, &address)
        .map_err(service_error)?;
    Ok((
        StatusCode::CREATED,
        Json(AddressResponse::build(&state, address)?),
    ))
}

async fn get_address(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AddressResponse>, Response> {
    let address = state
        .db
        .get_address(&id)
        .map_err(service_error)?
        .ok_or_else(|| not_found("address"))?;
    Ok(Json(AddressResponse::build(&state, address)?))
}

async fn update_address(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAddressRequest>,
) -> Result<Json<AddressResponse>, Response> {
    let mut address = state
        .db
        .get_address(&id)
        .map_err(service_error)?
        .ok_or_else(|| not_found("address"))?;
    address.dns_name = req.dns_name;

    state
        .reconciler()
        .save_address(&state.db, &address)
        .map_err(service_error)?;
    Ok(Json(AddressResponse::build(&state, address)?))
}

async fn delete_address(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Response> {
    state.db.delete_address(&id).map_err(service_error)?;
    info!(id = %id, "address deleted");
    Ok(StatusCode::NO_CONTENT)
}
