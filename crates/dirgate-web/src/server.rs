//! Dirgate HTTP server

use axum::{extract::FromRef, middleware, routing::get, Router};
use dirgate_auth::{open_directory, DirectoryAuthenticator};
use dirgate_core::{DirgateConfig, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};
use crate::middleware::require_authentication;
use crate::routes;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<DirectoryAuthenticator>,
    pub metrics: Arc<MetricsRecorder>,
    pub realm: Arc<str>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        authenticator: Arc<DirectoryAuthenticator>,
        metrics: Arc<MetricsRecorder>,
        realm: &str,
    ) -> Self {
        Self {
            authenticator,
            metrics,
            realm: Arc::from(realm),
            start_time: Instant::now(),
        }
    }
}

impl FromRef<AppState> for Arc<MetricsRecorder> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Build the application router
///
/// `/` and `/home` require authentication; `/metrics` and `/health` do not.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(routes::index))
        .route("/home", get(routes::home))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_authentication,
        ));

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}

pub struct DirgateServer {
    config: DirgateConfig,
}

impl DirgateServer {
    pub fn new(config: DirgateConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        self.config.validate()?;

        let metrics = Arc::new(MetricsRecorder::new()?);
        info!("Prometheus metrics initialized");

        let directory = open_directory(&self.config.directory)?;
        let authenticator = DirectoryAuthenticator::new(&self.config.directory, directory)?;
        info!(
            "Authenticating against the directory ({:?} policy)",
            authenticator.comparison()
        );

        let state = AppState::new(
            Arc::new(authenticator),
            metrics,
            &self.config.server.realm,
        );
        let app = create_router(state);

        let addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let listener = TcpListener::bind(&addr).await?;

        info!("Dirgate listening on http://{}", addr);
        info!("Prometheus metrics at http://{}/metrics", addr);

        axum::serve(listener, app).await?;
        Ok(())
    }
}
