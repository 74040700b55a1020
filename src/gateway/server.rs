//! # HTTP Server Module
//!
//! Wires the middleware stack in front of the virtual cluster and runs it with Axum.
//!
//! ```text
//! TraceLayer -> RequestInfoLayer -> AuthenticationLayer -> RedirectLayer -> VirtualCluster
//!                                                               |
//!                                                               +-> PhysicalGateway
//! ```
//!
//! ## Rust Concepts Used
//!
//! - `Arc<dyn Trait>` collaborators assembled once and shared by every connection
//! - `tokio::select!` to race the server against a shutdown signal
//! - `IntoFuture` to poll Axum's server future from more than one branch

use axum::Router;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission;
use crate::core::config::GatewayConfig;
use crate::core::error::{RedirectError, RedirectResult};
use crate::middleware::authentication::{
    AuthenticationLayer, TokenAuthenticator, TokenReviewAuthenticator,
};
use crate::middleware::redirect::{RedirectFilter, RedirectLayer};
use crate::middleware::request_info::RequestInfoLayer;
use crate::protocols::forward::{ForwardService, Forwarder, PhysicalGateway, VirtualCluster};
use crate::translate::SuffixNameMapper;

/// The collaborators a gateway is assembled from
pub struct GatewayComponents {
    pub filter: RedirectFilter,
    pub passthrough: Arc<dyn Forwarder>,
    pub authenticator: Option<Arc<dyn TokenAuthenticator>>,
}

impl GatewayComponents {
    /// Production collaborators described by the configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        if config.redirect.rules.is_empty() {
            warn!("No redirect rules configured, every request goes to the virtual cluster");
        }
        if !config.authentication.enabled && !config.redirect.rules.is_empty() {
            warn!(
                "Authentication is disabled; redirected requests act with the physical cluster's credentials unchecked"
            );
        }

        let filter = RedirectFilter::new(
            config.target_namespace.clone(),
            Arc::new(SuffixNameMapper::new(config.name_suffix.clone())),
            Arc::new(PhysicalGateway::new(config.physical_cluster.clone())),
        )
        .with_rules(config.redirect.rules.clone())
        .with_admission(admission::from_config(&config.admission))
        .require_authenticated(config.authentication.enabled);

        let authenticator = config.authentication.enabled.then(|| {
            Arc::new(TokenReviewAuthenticator::new(
                config.virtual_cluster.clone(),
                config.authentication.cache_ttl,
            )) as Arc<dyn TokenAuthenticator>
        });

        Self {
            filter,
            passthrough: Arc::new(VirtualCluster::new(config.virtual_cluster.clone())),
            authenticator,
        }
    }
}

/// Build the router; requests flow from the last layer added to the first
pub fn build_router(components: GatewayComponents) -> Router {
    let mut router = Router::new()
        .fallback_service(ForwardService::new(components.passthrough))
        .layer(RedirectLayer::new(components.filter));

    if let Some(authenticator) = components.authenticator {
        router = router.layer(AuthenticationLayer::new(authenticator));
    }

    router
        .layer(RequestInfoLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// A bound listener plus the application it serves
pub struct GatewayServer {
    listener: TcpListener,
    app: Router,
    shutdown_timeout: Duration,
}

impl GatewayServer {
    /// Bind the configured address and assemble the production stack
    pub async fn bind(config: &GatewayConfig) -> RedirectResult<Self> {
        let app = build_router(GatewayComponents::from_config(config));
        let address = format!("{}:{}", config.server.bind_address, config.server.port);
        Self::bind_with(&address, app, config.server.shutdown_timeout).await
    }

    pub async fn bind_with(
        address: &str,
        app: Router,
        shutdown_timeout: Duration,
    ) -> RedirectResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            RedirectError::internal(format!("Failed to bind gateway server to {}: {}", address, e))
        })?;

        Ok(Self {
            listener,
            app,
            shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> RedirectResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then drain for at most the shutdown timeout
    ///
    /// Upgraded streams (exec, attach, port-forward) run detached and are not waited for.
    pub async fn run<F>(self, shutdown: F) -> RedirectResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(address = %addr, "Gateway listening");

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                result.map_err(|e| RedirectError::internal(format!("server error: {}", e)))
            }
            _ = shutdown => {
                info!("Shutdown signal received, draining connections");
                let _ = stop_tx.send(());
                match timeout(self.shutdown_timeout, server).await {
                    Ok(result) => {
                        result.map_err(|e| RedirectError::internal(format!("server error: {}", e)))?;
                        info!("Gateway shutdown completed gracefully");
                    }
                    Err(_) => {
                        warn!(
                            timeout = ?self.shutdown_timeout,
                            "Shutdown timed out, dropping remaining connections"
                        );
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::rules::RedirectRule;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use tower::ServiceExt;

    struct Named(&'static str);

    #[async_trait]
    impl Forwarder for Named {
        async fn forward(&self, _request: Request<Body>) -> Response<Body> {
            Response::new(Body::from(self.0))
        }
    }

    fn components() -> GatewayComponents {
        let filter = RedirectFilter::new(
            "host-ns",
            Arc::new(SuffixNameMapper::new("vcluster")),
            Arc::new(Named("physical")),
        )
        .with_rules(vec![RedirectRule::new("", "v1", "pods", "*", "*")]);

        GatewayComponents {
            filter,
            passthrough: Arc::new(Named("virtual")),
            authenticator: None,
        }
    }

    async fn body(app: Router, uri: &str) -> String {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_router_routes_by_rules() {
        let app = build_router(components());
        assert_eq!(
            body(app.clone(), "/api/v1/namespaces/team-a/pods/web").await,
            "physical"
        );
        assert_eq!(
            body(app.clone(), "/api/v1/namespaces/team-a/services/web").await,
            "virtual"
        );
        assert_eq!(body(app, "/healthz").await, "virtual");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let server = GatewayServer::bind_with(
            "127.0.0.1:0",
            build_router(components()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
