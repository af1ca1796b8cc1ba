pub mod admission_response;
pub mod admission_review;
mod api;
mod certs;
pub mod cli;
pub mod config;
pub mod patch;
pub mod review;
pub mod tracing;

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use axum_server::tls_rustls::RustlsConfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::{self, TraceLayer};

use ::tracing::{Level, info};

use crate::{
    api::{
        handlers::{mutating_pods_handler, readiness_handler},
        state::ApiServerState,
    },
    config::Config,
    patch::PatchBuilder,
    review::ReviewHandler,
};

pub const MUTATING_PODS_PATH: &str = "/mutating-pods";
pub const READINESS_PATH: &str = "/readiness";

pub struct InjectorServer {
    router: Router,
    tls_config: RustlsConfig,
    addr: SocketAddr,
}

impl InjectorServer {
    /// Build the server from the process configuration.
    ///
    /// Fails when the TLS certificate or key cannot be loaded: the server
    /// must never start serving without them.
    pub async fn new_from_config(config: Config) -> Result<Self> {
        let tls_config = certs::create_tls_config(&config.tls_config).await?;

        let review_handler = ReviewHandler::new(PatchBuilder::new(config.init_container_image));
        let state = Arc::new(ApiServerState { review_handler });

        let router = Router::new()
            .route(MUTATING_PODS_PATH, post(mutating_pods_handler))
            .route(READINESS_PATH, get(readiness_handler))
            .with_state(state)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            );

        Ok(Self {
            router,
            tls_config,
            addr: config.addr,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(self) -> Result<()> {
        info!(address = self.addr.to_string().as_str(), "started HTTPS server");
        axum_server::bind_rustls(self.addr, self.tls_config)
            .serve(self.router.into_make_service())
            .await?;

        Ok(())
    }
}
