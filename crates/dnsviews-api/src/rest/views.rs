use crate::security::{service_error, Pagination};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use dnsviews_consistency::workflow::{BulkViewChanges, ViewChanges, ViewDraft, ViewImportRow};
use dnsviews_core::error::FieldErrors;
use dnsviews_core::types::View;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/views",
            get(list_views).post(create_view).patch(bulk_edit_views),
        )
        .route("/views/import", post(import_views))
        .route(
            "/views/{id}",
            get(get_view).put(update_view).delete(delete_view),
        )
        .route("/views/{id}/validate", post(validate_view))
}

#[derive(Serialize)]
struct ViewResponse {
    id: Uuid,
    name: String,
    description: String,
    default_view: bool,
    tenant: Option<String>,
    prefixes: BTreeSet<IpNet>,
    created_at: String,
    updated_at: String,
}

impl From<View> for ViewResponse {
    fn from(view: View) -> Self {
        Self {
            id: view.id,
            name: view.name,
            description: view.description,
            default_view: view.default_view,
            tenant: view.tenant,
            prefixes: view.prefixes,
            created_at: view.created_at.to_rfc3339(),
            updated_at: view.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
struct BulkEditRequest {
    ids: Vec<Uuid>,
    #[serde(flatten)]
    changes: BulkViewChanges,
}

#[derive(Deserialize)]
struct ValidateRequest {
    prefixes: BTreeSet<IpNet>,
}

#[derive(Serialize)]
struct ValidateResponse {
    valid: bool,
    errors: FieldErrors,
}

async fn list_views(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<ViewResponse>>, Response> {
    let views = state.db.list_views().map_err(service_error)?;
    Ok(Json(
        page.apply(views).into_iter().map(ViewResponse::from).collect(),
    ))
}

async fn create_view(
    State(state): State<AppState>,
    Json(draft): Json<ViewDraft>,
) -> Result<(StatusCode, Json<ViewResponse>), Response> {
    let view = state.editor.create(draft).map_err(service_error)?;
    Ok((StatusCode::CREATED, Json(view.into())))
}

async fn bulk_edit_views(
    State(state): State<AppState>,
    Json(req): Json<BulkEditRequest>,
) -> Result<Json<Vec<ViewResponse>>, Response> {
    let views = state
        .editor
        .bulk_edit(&req.ids, req.changes)
        .map_err(service_error)?;
    Ok(Json(views.into_iter().map(ViewResponse::from).collect()))
}

async fn import_views(
    State(state): State<AppState>,
    Json(rows): Json<Vec<ViewImportRow>>,
) -> Result<(StatusCode, Json<Vec<ViewResponse>>), Response> {
    let views = state.editor.import(rows).map_err(service_error)?;
    Ok((
        StatusCode::CREATED,
        Json(views.into_iter().map(ViewResponse::from).collect()),
    ))
}

async fn get_view(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ViewResponse>, Response> {
    let view = state
        .db
        .get_view(&id)
        .map_err(service_error)?
        .ok_or_else(|| crate::security::not_found("view"))?;
    Ok(Json(view.into()))
}

async fn update_view(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<ViewChanges>,
) -> Result<Json<ViewResponse>, Response> {
    let view = state.editor.update(&id, changes).map_err(service_error)?;
    Ok(Json(view.into()))
}

async fn delete_view(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Response> {
    state.editor.delete(&id).map_err(service_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Dry-run a prefix change without persisting anything.
async fn validate_view(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, Response> {
    let errors = state
        .editor
        .validate(&id, &req.prefixes)
        .map_err(service_error)?;
    Ok(Json(ValidateResponse {
        valid: errors.is_empty(),
        errors,
    }))
}
