//! # Forwarders
//!
//! The two places a request can end up:
//!
//! - [`PhysicalGateway`]: redirected requests, sent to the physical cluster with the caller's
//!   credentials removed and the gateway's own credentials injected
//! - [`VirtualCluster`]: everything else, passed unmodified to the virtual cluster's API server
//!   under the caller's own credentials; the gateway never lends it an identity
//!
//! Both report their own failures as Kubernetes `Status` responses, so callers always get a
//! response back.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, AUTHORIZATION, PROXY_AUTHORIZATION};
use axum::http::{Request, Response};
use futures::future::BoxFuture;
use metrics::counter;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::warn;

use crate::core::config::ClusterConnection;
use crate::protocols::http::{Credentials, LazyTransport};

const IMPERSONATE_PREFIX: &str = "impersonate-";

/// Something that can carry a request to an API server and produce its response
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: Request<Body>) -> Response<Body>;
}

/// Remove every credential the caller presented to the virtual cluster
pub fn strip_credentials(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);
    headers.remove(PROXY_AUTHORIZATION);

    let impersonation: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(IMPERSONATE_PREFIX))
        .cloned()
        .collect();
    for name in impersonation {
        headers.remove(name);
    }
}

async fn forward_with(transport: &LazyTransport, request: Request<Body>) -> Response<Body> {
    let headers = request.headers().clone();

    let result = match transport.get().await {
        Ok(client) => client.serve(request).await,
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        warn!(
            cluster = %transport.name(),
            error = %e,
            "Forwarding failed"
        );
        counter!("forward_errors_total", "cluster" => transport.name().to_string()).increment(1);
        e.into_negotiated_response(&headers)
    })
}

/// Forwarder to the physical cluster
#[derive(Debug)]
pub struct PhysicalGateway {
    transport: LazyTransport,
}

impl PhysicalGateway {
    pub fn new(connection: ClusterConnection) -> Self {
        Self {
            transport: LazyTransport::new(connection),
        }
    }
}

#[async_trait]
impl Forwarder for PhysicalGateway {
    async fn forward(&self, mut request: Request<Body>) -> Response<Body> {
        strip_credentials(request.headers_mut());
        forward_with(&self.transport, request).await
    }
}

/// Forwarder to the virtual cluster, used for requests that are not redirected
#[derive(Debug)]
pub struct VirtualCluster {
    transport: LazyTransport,
}

impl VirtualCluster {
    /// Only the connection's address and CA are used; its token and client certificate are not
    pub fn new(connection: ClusterConnection) -> Self {
        Self {
            transport: LazyTransport::with_credentials(connection, Credentials::Caller),
        }
    }
}

#[async_trait]
impl Forwarder for VirtualCluster {
    async fn forward(&self, request: Request<Body>) -> Response<Body> {
        forward_with(&self.transport, request).await
    }
}

/// Adapts a [`Forwarder`] into a tower `Service`, for use as the router's fallback
#[derive(Clone)]
pub struct ForwardService {
    forwarder: Arc<dyn Forwarder>,
}

impl ForwardService {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> Self {
        Self { forwarder }
    }
}

impl Service<Request<Body>> for ForwardService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let forwarder = self.forwarder.clone();
        Box::pin(async move { Ok(forwarder.forward(request).await) })
    }
}
