// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! Lifecycle of the gateway: router and middleware, the background order
//! refresh of the fronted project, and coordinated graceful shutdown using
//! `CancellationToken`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{HeaderName, Request},
};
use provider_routing::HttpRoutingLink;
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};

use crate::{
    config::GatewayConfig,
    error::{GatewayError, GatewayResult},
    metrics::PrometheusObserver,
    routes::create_routes,
    state::GatewayState,
};

// Server constants
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to drain in-flight requests once shutdown starts
    pub graceful_timeout: Duration,
    /// Maximum time to wait for the refresh task after the server stops
    pub force_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
            force_timeout: Duration::from_secs(DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Main server struct
#[derive(Debug)]
pub struct Server {
    config: GatewayConfig,
    router: Router,
    state: GatewayState,
    cancellation_token: CancellationToken,
    shutdown_config: ShutdownConfig,
}

impl Server {
    /// Create a server routing over the HTTP stack described by `config`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Routing` if the routing configuration is invalid.
    pub fn new(config: GatewayConfig, shutdown_config: ShutdownConfig) -> GatewayResult<Self> {
        let link = HttpRoutingLink::from_config(config.routing.clone())?
            .with_observer(Arc::new(PrometheusObserver));
        Ok(Self::with_link(config, shutdown_config, Arc::new(link)))
    }

    /// Create a server around an existing routing link
    pub fn with_link(
        config: GatewayConfig,
        shutdown_config: ShutdownConfig,
        link: Arc<HttpRoutingLink>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let state = GatewayState::new(config.clone(), link, cancellation_token.child_token());
        let router = Self::create_router(state.clone());

        Self {
            config,
            router,
            state,
            cancellation_token,
            shutdown_config,
        }
    }

    /// Create application router with middleware
    fn create_router(state: GatewayState) -> Router {
        let timeout_duration = state.config().timeout_seconds.value();

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                    if let Some(request_id) = req.headers().get(REQUEST_ID_HEADER) {
                        info_span!("http_request", ?request_id)
                    } else {
                        error!("failed to extract id from request");
                        info_span!("http_request", request_id = "unknown")
                    }
                }),
            )
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(timeout_duration));

        create_routes().layer(middleware).with_state(state)
    }

    async fn bind(&self) -> GatewayResult<(TcpListener, SocketAddr)> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| GatewayError::Bind {
                address: addr,
                source,
            })?;
        let actual_addr = listener
            .local_addr()
            .map_err(|source| GatewayError::Startup { source })?;
        Ok((listener, actual_addr))
    }

    fn spawn_refresh(&self) -> JoinHandle<()> {
        Arc::clone(self.state.link().registry()).spawn_refresh(self.cancellation_token.child_token())
    }

    /// Run the server with coordinated graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Bind` if unable to bind to the configured address,
    /// or `GatewayError::Shutdown` if serving fails.
    pub async fn run(self) -> GatewayResult<()> {
        let (listener, actual_addr) = self.bind().await?;

        info!(
            address = %actual_addr,
            environment = %self.config.environment,
            project = %self.config.routing.resource_id,
            "gateway starting",
        );

        let shutdown_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            Self::shutdown_signal_handler(shutdown_token).await;
        });

        let refresh = self.spawn_refresh();

        let router = self.router;
        let serve_token = self.cancellation_token.clone();
        let mut server_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { serve_token.cancelled().await })
                .await
        });

        let server_result = tokio::select! {
            result = &mut server_task => result?,
            () = self.cancellation_token.cancelled() => {
                match timeout(self.shutdown_config.graceful_timeout, &mut server_task).await {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!(
                            timeout = ?self.shutdown_config.graceful_timeout,
                            "in-flight requests did not drain, aborting"
                        );
                        server_task.abort();
                        Ok(())
                    }
                }
            }
        };

        self.cancellation_token.cancel();
        if timeout(self.shutdown_config.force_timeout, refresh)
            .await
            .is_err()
        {
            warn!("order refresh did not stop in time");
        }

        match server_result {
            Ok(()) => {
                info!("gateway shut down gracefully");
                Ok(())
            }
            Err(source) => {
                error!(error = ?source, "server error during shutdown");
                Err(GatewayError::Shutdown { source })
            }
        }
    }

    /// Handle shutdown signals and trigger coordinated cancellation
    async fn shutdown_signal_handler(cancellation_token: CancellationToken) {
        let signal_received = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};

                match (
                    signal(SignalKind::terminate()),
                    signal(SignalKind::interrupt()),
                ) {
                    (Ok(mut sigterm), Ok(mut sigint)) => {
                        tokio::select! {
                            _ = sigterm.recv() => "SIGTERM",
                            _ = sigint.recv() => "SIGINT",
                        }
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        error!(error = %e, "failed to register signal handlers");
                        std::future::pending().await
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to install CTRL+C handler");
                    std::future::pending::<()>().await;
                }
                "CTRL+C"
            }
        };

        tokio::select! {
            signal_name = signal_received => {
                warn!(signal = signal_name, "shutdown signal received, cancelling all operations");
                cancellation_token.cancel();
            },
            () = cancellation_token.cancelled() => {}
        }
    }

    /// Returns a clone of the cancellation token for coordinated shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Initiates graceful shutdown by cancelling the server's cancellation token
    pub fn shutdown(&self) {
        info!("programmatic shutdown requested");
        self.cancellation_token.cancel();
    }

    /// Run server for testing, returns the bound address
    ///
    /// Cancelling the returned token stops the server and the order refresh.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Bind` if unable to bind to the configured address.
    pub async fn run_for_testing(self) -> GatewayResult<(SocketAddr, CancellationToken)> {
        let (listener, actual_addr) = self.bind().await?;

        self.spawn_refresh();
        let router = self.router;
        let token = self.cancellation_token.clone();
        let task = token.child_token();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { task.cancelled().await })
                .await;
        });

        Ok((actual_addr, token))
    }

    /// Get gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get gateway state for testing
    pub fn state(&self) -> &GatewayState {
        &self.state
    }
}
