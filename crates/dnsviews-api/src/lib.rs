pub mod rest;
pub mod security;

use axum::middleware;
use axum::Router;
use dnsviews_consistency::{RecordReconciler, ViewEditor};
use dnsviews_core::config::RecordSyncConfig;
use dnsviews_core::db::Db;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    listen_addr: SocketAddr,
    db: Db,
    api_key: Option<String>,
    instance_id: String,
    records: RecordSyncConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub editor: ViewEditor,
    pub api_key: Option<Arc<String>>,
    pub instance_id: String,
}

impl AppState {
    pub fn new(db: Db, records: &RecordSyncConfig) -> Self {
        let reconciler = RecordReconciler::with_config(db.clone(), records);
        Self {
            db,
            editor: ViewEditor::with_reconciler(reconciler),
            api_key: None,
            instance_id: String::new(),
        }
    }

    pub fn reconciler(&self) -> &RecordReconciler {
        self.editor.reconciler()
    }
}

/// Full application router, `/api/v1` routes behind the API key check.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", rest::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::api_key_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiServer {
    pub fn new(listen_addr: SocketAddr, db: Db, api_key: Option<String>) -> Self {
        Self {
            listen_addr,
            db,
            api_key,
            instance_id: String::new(),
            records: RecordSyncConfig::default(),
        }
    }

    pub fn with_instance_id(mut self, id: &str) -> Self {
        self.instance_id = id.to_string();
        self
    }

    pub fn with_record_config(mut self, records: RecordSyncConfig) -> Self {
        self.records = records;
        self
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut state = AppState::new(self.db, &self.records);
        state.api_key = self.api_key.map(Arc::new);
        state.instance_id = self.instance_id;

        let app = app(state);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        info!("REST API listening on {}", self.listen_addr);

        let mut shutdown = shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        Ok(())
    }
}
