use crate::security::{not_found, service_error, Pagination};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use dnsviews_consistency::ViewRegistry;
use dnsviews_core::types::Prefix;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prefixes", get(list_prefixes).post(create_prefix))
        .route("/prefixes/{id}", get(get_prefix).delete(delete_prefix))
        .route("/prefixes/{id}/views", get(prefix_views))
}

#[derive(Serialize)]
struct PrefixResponse {
    id: Uuid,
    prefix: IpNet,
    description: String,
    created_at: String,
}

impl From<Prefix> for PrefixResponse {
    fn from(p: Prefix) -> Self {
        Self {
            id: p.id,
            prefix: p.prefix,
            description: p.description,
            created_at: p.created_at.to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
struct CreatePrefixRequest {
    prefix: IpNet,
    #[serde(default)]
    description: String,
}

#[derive(Serialize)]
struct ViewRef {
    id: Uuid,
    name: String,
}

#[derive(Serialize)]
struct PrefixViewsResponse {
    prefix: IpNet,
    /// Views the prefix is assigned to directly
    assigned: Vec<ViewRef>,
}

async fn list_prefixes(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<PrefixResponse>>, Response> {
    let prefixes = state.db.list_prefixes().map_err(service_error)?;
    Ok(Json(
        page.apply(prefixes)
            .into_iter()
            .map(PrefixResponse::from)
            .collect(),
    ))
}

async fn create_prefix(
    State(state): State<AppState>,
    Json(req): Json<CreatePrefixRequest>,
) -> Result<(StatusCode, Json<PrefixResponse>), Response> {
    let mut prefix = Prefix::new(req.prefix);
    prefix.description = req.description;
    state.db.create_prefix(&prefix).map_err(service_error)?;
    info!(prefix = %prefix.prefix, "prefix created");
    Ok((StatusCode::CREATED, Json(prefix.into())))
}

async fn get_prefix(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PrefixResponse>, Response> {
    let prefix = state
        .db
        .get_prefix(&id)
        .map_err(service_error)?
        .ok_or_else(|| not_found("prefix"))?;
    Ok(Json(prefix.into()))
}

/// Remove a prefix and its view assignments, then re-sync the records of
/// the addresses it contained.
async fn delete_prefix(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Response> {
    let prefix = state
        .db
        .get_prefix(&id)
        .map_err(service_error)?
        .ok_or_else(|| not_found("prefix"))?;

    state.db.delete_prefix(&id).map_err(service_error)?;

    let addresses = state.db.addresses_in(&prefix.prefix).map_err(service_error)?;
    state
        .reconciler()
        .sync_addresses(&state.db, &addresses)
        .map_err(service_error)?;

    info!(prefix = %prefix.prefix, "prefix deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn prefix_views(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PrefixViewsResponse>, Response> {
    let prefix = state
        .db
        .get_prefix(&id)
        .map_err(service_error)?
        .ok_or_else(|| not_found("prefix"))?;

    let assigned = state
        .db
        .views_assigned_to(&prefix.prefix)
        .map_err(service_error)?
        .into_iter()
        .map(|v| ViewRef {
            id: v.id,
            name: v.name,
        })
        .collect();

    Ok(Json(PrefixViewsResponse {
        prefix: prefix.prefix,
        assigned,
    }))
}

#[cfg(test)]
mod tests {
    use crate::{app, AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dnsviews_core::config::RecordSyncConfig;
    use dnsviews_core::db::Db;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_prefix_crud_and_views() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        let app = app(AppState::new(db, &RecordSyncConfig::default()));

        let response = app
            .clone()
            .oneshot(post("/api/v1/prefixes", json!({ "prefix": "10.0.0.7/24" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let prefix = json_body(response).await;
        assert_eq!(prefix["prefix"], "10.0.0.0/24");
        let id = prefix["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post("/api/v1/prefixes", json!({ "prefix": "10.0.0.0/24" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/views",
                json!({ "name": "internal", "prefixes": ["10.0.0.0/24"] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/prefixes/{id}/views"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let views = json_body(response).await;
        assert_eq!(views["assigned"][0]["name"], "internal");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/prefixes/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/views")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let views = json_body(response).await;
        assert_eq!(views[0]["prefixes"], json!([]));
    }
}
