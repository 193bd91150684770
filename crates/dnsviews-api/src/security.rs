use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dnsviews_core::error::Error;
use serde_json::json;
use tracing::{error, warn};

use crate::AppState;

/// Convert an internal error into a generic 500 response, logging the real error.
pub fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    error!("internal error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error".to_string(),
    )
}

/// Map a store or workflow error onto an HTTP response.
pub fn service_error(e: Error) -> Response {
    match e {
        Error::Rejected(errors) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response()
        }
        Error::ImportRejected(rows) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "errors": rows }))).into_response()
        }
        Error::ViewNotFound(_)
        | Error::PrefixNotFound(_)
        | Error::AddressNotFound(_)
        | Error::ZoneNotFound(_)
        | Error::RecordNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        Error::DuplicateView(_)
        | Error::DuplicatePrefix(_)
        | Error::DuplicateAddress(_)
        | Error::DuplicateZone(_) => (StatusCode::CONFLICT, e.to_string()).into_response(),
        Error::InvalidRecord(_) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        other => internal_error(other).into_response(),
    }
}

/// 404 response for an id that does not resolve.
pub fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{what} not found")).into_response()
}

/// Middleware: enforce API key authentication when configured.
/// Skips auth for the health endpoint.
pub async fn api_key_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected_key = match &state.api_key {
        Some(key) => key,
        None => return Ok(next.run(request).await),
    };

    if request.uri().path() == "/api/v1/health" {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == expected_key.as_str() => Ok(next.run(request).await),
        _ => {
            warn!(path = %request.uri().path(), "request without valid api key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Pagination query parameters for list endpoints.
#[derive(Debug, serde::Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

impl Pagination {
    /// Apply pagination to a Vec, clamping limit to 1000.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let limit = self.limit.min(1000);
        items.into_iter().skip(self.offset).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsviews_core::error::FieldErrors;

    #[test]
    fn test_pagination_clamps() {
        let page = Pagination {
            offset: 2,
            limit: 5000,
        };
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(page.apply(items), (2..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_service_error_status() {
        let mut errors = FieldErrors::new();
        errors.add("prefixes", "broken");
        assert_eq!(
            service_error(Error::Rejected(errors)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            service_error(Error::ViewNotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            service_error(Error::DuplicateZone("example.com".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            service_error(Error::Database("disk on fire".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
