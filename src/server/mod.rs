//! HTTP server
//!
//! # Routes
//! - `GET /healthz`: liveness, never authenticated
//! - `GET|POST /clean`: fetch, normalize, remove background
//! - `GET /selftest`: run a synthetic image through the model
//! - `GET /info`: model and limits in use
//!
//! Everything except `/healthz` sits behind the shared-token check, which runs
//! before any request body is read.

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;

pub use self::error::ApiError;
pub use self::handlers::ServiceInfo;

use crate::config::ServerConfig;
use crate::pipeline::CleanPipeline;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Room for multipart framing and text fields on top of the payload limit
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Application state injected into handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Arc<CleanPipeline>,
    pub token: Option<Arc<str>>,
    pub debug: bool,
    pub info: Arc<ServiceInfo>,
}

impl AppState {
    #[must_use]
    pub fn new(config: &ServerConfig, pipeline: Arc<CleanPipeline>) -> Self {
        let info = Arc::new(ServiceInfo::new(config, &pipeline));
        Self {
            pipeline,
            token: config.token.as_deref().map(Arc::from),
            debug: config.debug,
            info,
        }
    }
}

/// Build the router with all middleware layers
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .pipeline
        .fetcher()
        .max_bytes()
        .saturating_add(BODY_LIMIT_SLACK);

    let protected = Router::new()
        .route("/clean", get(handlers::clean).post(handlers::clean))
        .route("/selftest", get(handlers::selftest))
        .route("/info", get(handlers::info))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// The cleaning HTTP server
pub struct CleanerServer {
    router: Router,
    bind_addr: SocketAddr,
}

impl CleanerServer {
    #[must_use]
    pub fn new(config: &ServerConfig, pipeline: Arc<CleanPipeline>) -> Self {
        Self {
            router: router(AppState::new(config, pipeline)),
            bind_addr: config.bind_addr,
        }
    }

    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind the configured address and serve until a shutdown signal
    ///
    /// # Errors
    /// - Binding the listener fails
    /// - The server stops with an I/O error
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an existing listener until a shutdown signal
    ///
    /// # Errors
    /// - The server stops with an I/O error
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
