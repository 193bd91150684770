pub mod addresses;
pub mod health;
pub mod prefixes;
pub mod views;
pub mod zones;

use crate::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(views::router())
        .merge(prefixes::router())
        .merge(addresses::router())
        .merge(zones::router())
        .merge(health::router())
}
