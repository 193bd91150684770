use crate::security::{not_found, service_error, Pagination};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use dnsviews_consistency::records::validate_dns_name;
use dnsviews_core::types::{Record, SoaData, Zone};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/zones", get(list_zones).post(create_zone))
        .route("/zones/{id}", axum::routing::delete(delete_zone))
        .route("/zones/{id}/records", get(list_zone_records))
}

#[derive(Serialize)]
struct ZoneResponse {
    id: Uuid,
    view_id: Uuid,
    name: String,
    soa: SoaData,
    default_ttl: u32,
    created_at: String,
    updated_at: String,
}

impl From<Zone> for ZoneResponse {
    fn from(zone: Zone) -> Self {
        Self {
            id: zone.id,
            view_id: zone.view_id,
            name: zone.name,
            soa: zone.soa,
            default_ttl: zone.default_ttl,
            created_at: zone.created_at.to_rfc3339(),
            updated_at: zone.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct RecordResponse {
    id: Uuid,
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    value: String,
    ttl: u32,
    enabled: bool,
    /// Maintained on behalf of an IPAM address
    managed: bool,
}

impl From<Record> for RecordResponse {
    fn from(r: Record) -> Self {
        Self {
            id: r.id,
            rtype: r.data.record_type().to_string(),
            value: r.data.value(),
            name: r.name,
            ttl: r.ttl,
            enabled: r.enabled,
            managed: r.ipam_address_id.is_some(),
        }
    }
}

#[derive(Deserialize)]
struct ZoneFilter {
    view_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct CreateZoneRequest {
    /// Owning view; the default view when omitted
    #[serde(default)]
    view_id: Option<Uuid>,
    name: String,
    #[serde(default = "default_ttl")]
    default_ttl: u32,
    #[serde(default)]
    soa: Option<CreateSoaRequest>,
}

#[derive(Deserialize)]
struct CreateSoaRequest {
    mname: Option<String>,
    rname: Option<String>,
    refresh: Option<u32>,
    retry: Option<u32>,
    expire: Option<u32>,
    minimum: Option<u32>,
}

fn default_ttl() -> u32 {
    300
}

async fn list_zones(
    State(state): State<AppState>,
    Query(filter): Query<ZoneFilter>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<ZoneResponse>>, Response> {
    let zones = match filter.view_id {
        Some(view_id) => state.db.zones_in_view(&view_id),
        None => state.db.list_zones(),
    }
    .map_err(service_error)?;

    Ok(Json(
        page.apply(zones).into_iter().map(ZoneResponse::from).collect(),
    ))
}

/// Create a zone, then re-sync address records so addresses governed by its
/// view pick it up.
async fn create_zone(
    State(state): State<AppState>,
    Json(req): Json<CreateZoneRequest>,
) -> Result<(StatusCode, Json<ZoneResponse>), Response> {
    let name = req.name.trim_end_matches('.').to_ascii_lowercase();
    validate_dns_name(&name)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid zone name: {e}")).into_response())?;

    let view = match req.view_id {
        Some(id) => state.db.get_view(&id).map_err(service_error)?,
        None => state.db.get_default_view().map_err(service_error)?,
    }
    .ok_or_else(|| not_found("view"))?;

    let serial = Utc::now()
        .format("%Y%m%d00")
        .to_string()
        .parse()
        .unwrap_or(1);
    let soa = match req.soa {
        Some(s) => SoaData {
            mname: s.mname.unwrap_or_else(|| format!("ns1.{name}")),
            rname: s.rname.unwrap_or_else(|| format!("admin.{name}")),
            serial,
            refresh: s.refresh.unwrap_or(3600),
            retry: s.retry.unwrap_or(900),
            expire: s.expire.unwrap_or(604800),
            minimum: s.minimum.unwrap_or(300),
        },
        None => SoaData {
            mname: format!("ns1.{name}"),
            rname: format!("admin.{name}"),
            serial,
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 300,
        },
    };

    let zone = Zone {
        id: Uuid::new_v4(),
        view_id: view.id,
        name,
        soa,
        default_ttl: req.default_ttl,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    state.db.create_zone(&zone).map_err(service_error)?;

    let addresses = state.db.list_addresses().map_err(service_error)?;
    state
        .reconciler()
        .sync_addresses(&state.db, &addresses)
        .map_err(service_error)?;

    info!(zone = %zone.name, view = %view.name, "zone created");
    Ok((StatusCode::CREATED, Json(zone.into())))
}

async fn delete_zone(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Response> {
    state.db.delete_zone(&id).map_err(service_error)?;
    info!(id = %id, "zone deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_zone_records(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RecordResponse>>, Response> {
    state
        .db
        .get_zone(&id)
        .map_err(service_error)?
        .ok_or_else(|| not_found("zone"))?;

    let records = state.db.list_records(&id).map_err(service_error)?;
    Ok(Json(records.into_iter().map(RecordResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use crate::{app, AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dnsviews_core::config::RecordSyncConfig;
    use dnsviews_core::db::Db;
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_zone_needs_view() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        let app = app(AppState::new(db, &RecordSyncConfig::default()));

        // no default view yet
        let response = app
            .clone()
            .oneshot(post("/api/v1/zones", json!({ "name": "example.com" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/views",
                json!({ "name": "default", "default_view": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(post("/api/v1/zones", json!({ "name": "bad name.com" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post("/api/v1/zones", json!({ "name": "Example.com." })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let zone: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(zone["name"], "example.com");

        let response = app
            .clone()
            .oneshot(post("/api/v1/zones", json!({ "name": "example.com" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/zones/{}", zone["id"].as_str().unwrap()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
