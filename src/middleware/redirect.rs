//! # Redirect Middleware
//!
//! The filter that decides where a request goes. Each request moves through:
//!
//! ```text
//! received -> classified -> passthrough                      (no rule matched)
//!                        -> authenticated -> admitting -> translating -> forwarding
//!              any step above may end the request with an error Status instead
//! ```
//!
//! - **classified**: the [`RequestInfo`] attached by the request-info stage is matched against
//!   the redirect rules. A missing `RequestInfo` means the middleware stack is wired wrong and
//!   is answered with a 500.
//! - **authenticated**: with authentication enabled, a request that matched a rule but carries
//!   no verified user is refused with a 401. The physical gateway acts with its own
//!   credentials, so an anonymous caller must never reach it.
//! - **admitting**: pod connect requests go through the admission plugins.
//! - **translating**: namespace and name in the path are rewritten for the physical cluster.
//! - **forwarding**: the rewritten request goes to the physical gateway, which reports its own
//!   failures.
//!
//! Exactly one response is produced per request, either by the wrapped service or by this
//! filter.
//!
//! ## Rust Concepts Used
//!
//! - Collaborators are injected as trait objects (`Arc<dyn Forwarder>`, `Arc<dyn NameMapper>`)
//!   so tests can replace each one
//! - The request is split into `Parts` and body, and a new request is assembled for forwarding
//!   instead of mutating shared state

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use metrics::counter;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, error};

use crate::admission::{maybe_admit, AdmissionInterface, ObjectInterfaces, ParameterCodec};
use crate::core::error::RedirectError;
use crate::core::types::{RequestInfo, UserInfo};
use crate::protocols::forward::Forwarder;
use crate::routing::rules::{applies, RedirectRule};
use crate::translate::{translate, NameMapper};

/// Everything the filter needs, fixed at construction and shared by all requests
pub struct RedirectFilter {
    rules: Vec<RedirectRule>,
    target_namespace: String,
    names: Arc<dyn NameMapper>,
    admission: Option<Arc<dyn AdmissionInterface>>,
    require_user: bool,
    codec: ParameterCodec,
    interfaces: ObjectInterfaces,
    gateway: Arc<dyn Forwarder>,
}

impl RedirectFilter {
    pub fn new(
        target_namespace: impl Into<String>,
        names: Arc<dyn NameMapper>,
        gateway: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            rules: Vec::new(),
            target_namespace: target_namespace.into(),
            names,
            admission: None,
            require_user: false,
            codec: ParameterCodec::default(),
            interfaces: ObjectInterfaces::default(),
            gateway,
        }
    }

    pub fn with_rules(mut self, rules: Vec<RedirectRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_admission(mut self, admission: Option<Arc<dyn AdmissionInterface>>) -> Self {
        self.admission = admission;
        self
    }

    /// Refuse to redirect requests that carry no authenticated [`UserInfo`]
    pub fn require_authenticated(mut self, required: bool) -> Self {
        self.require_user = required;
        self
    }

    /// Admit, translate and forward a request that matched a rule
    async fn redirect(&self, request: Request<Body>, info: &RequestInfo) -> Response {
        let (mut parts, body) = request.into_parts();

        if self.require_user && parts.extensions.get::<UserInfo>().is_none() {
            debug!(path = %parts.uri.path(), "Refusing to redirect anonymous request");
            counter!("redirect_requests_total", "outcome" => "denied").increment(1);
            return RedirectError::unauthenticated("anonymous requests cannot be redirected")
                .into_negotiated_response(&parts.headers);
        }

        if let Err(e) = maybe_admit(
            &parts,
            info,
            self.admission.as_deref(),
            &self.codec,
            &self.interfaces,
        )
        .await
        {
            counter!("redirect_requests_total", "outcome" => "denied").increment(1);
            return e.into_negotiated_response(&parts.headers);
        }

        let uri = match translate(&parts.uri, info, &self.target_namespace, self.names.as_ref()) {
            Ok(uri) => uri,
            Err(e) => {
                debug!(path = %parts.uri.path(), error = %e, "Refusing to redirect request");
                counter!("redirect_requests_total", "outcome" => "rejected").increment(1);
                return e.into_negotiated_response(&parts.headers);
            }
        };

        debug!(
            from = %parts.uri,
            to = %uri,
            verb = %info.verb,
            "Redirecting request to physical cluster"
        );
        counter!("redirect_requests_total", "outcome" => "redirected").increment(1);

        parts.uri = uri;
        self.gateway.forward(Request::from_parts(parts, body)).await
    }
}

#[derive(Clone)]
pub struct RedirectLayer {
    filter: Arc<RedirectFilter>,
}

impl RedirectLayer {
    pub fn new(filter: RedirectFilter) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl<S> Layer<S> for RedirectLayer {
    type Service = RedirectService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RedirectService {
            inner,
            filter: Arc::clone(&self.filter),
        }
    }
}

#[derive(Clone)]
pub struct RedirectService<S> {
    inner: S,
    filter: Arc<RedirectFilter>,
}

impl<S> Service<Request<Body>> for RedirectService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let filter = Arc::clone(&self.filter);

        Box::pin(async move {
            let Some(info) = request.extensions().get::<RequestInfo>().cloned() else {
                error!(
                    path = %request.uri().path(),
                    "No request info attached; the request-info layer must run first"
                );
                return Ok(RedirectError::RequestInfoMissing.into_negotiated_response(request.headers()));
            };

            if !applies(&info, &filter.rules) {
                counter!("redirect_requests_total", "outcome" => "passthrough").increment(1);
                return inner.call(request).await;
            }

            Ok(filter.redirect(request, &info).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionChain, ConnectSubresource, DenyConnect};
    use crate::middleware::request_info::RequestInfoLayer;
    use async_trait::async_trait;
    use axum::http::header::AUTHORIZATION;
    use axum::http::StatusCode;
    use std::sync::Mutex;
    use tower::{service_fn, ServiceExt};

    /// Records forwarded requests instead of sending them
    #[derive(Default)]
    struct Recording {
        forwarded: Mutex<Vec<(String, Option<String>)>>,
    }

    impl Recording {
        fn uris(&self) -> Vec<String> {
            self.forwarded
                .lock()
                .unwrap()
                .iter()
                .map(|(uri, _)| uri.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Forwarder for Recording {
        async fn forward(&self, request: Request<Body>) -> Response {
            let authorization = request
                .headers()
                .get(AUTHORIZATION)
                .map(|v| v.to_str().unwrap().to_string());
            self.forwarded
                .lock()
                .unwrap()
                .push((request.uri().to_string(), authorization));
            Response::new(Body::from("physical"))
        }
    }

    fn suffix(name: &str, _namespace: &str) -> String {
        format!("{}-x7f2", name)
    }

    fn filter(gateway: Arc<Recording>, rules: Vec<RedirectRule>) -> RedirectFilter {
        RedirectFilter::new("host-ns", Arc::new(suffix), gateway).with_rules(rules)
    }

    fn virtual_cluster() -> impl Service<
        Request<Body>,
        Response = Response,
        Error = Infallible,
        Future = BoxFuture<'static, Result<Response, Infallible>>,
    > + Clone
           + Send
           + 'static {
        service_fn(|_request: Request<Body>| -> BoxFuture<'static, Result<Response, Infallible>> {
            Box::pin(async { Ok(Response::new(Body::from("virtual"))) })
        })
    }

    async fn send(filter: RedirectFilter, method: &str, uri: &str) -> (StatusCode, String) {
        let service = tower::ServiceBuilder::new()
            .layer(RequestInfoLayer::new())
            .layer(RedirectLayer::new(filter))
            .service(virtual_cluster());

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_matching_request_is_translated_and_forwarded() {
        let gateway = Arc::new(Recording::default());
        let (status, body) = send(
            filter(gateway.clone(), vec![RedirectRule::new("g", "v1", "pods", "*", "get")]),
            "GET",
            "/apis/g/v1/namespaces/tenant-ns/pods/my-pod",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "physical");
        assert_eq!(
            gateway.uris(),
            vec!["/apis/g/v1/namespaces/host-ns/pods/my-pod-x7f2/"]
        );
    }

    #[tokio::test]
    async fn test_non_matching_request_passes_through() {
        let gateway = Arc::new(Recording::default());
        let rules = vec![RedirectRule::new("", "v1", "pods", "exec", "*")];

        let (_, body) = send(
            filter(gateway.clone(), rules.clone()),
            "GET",
            "/api/v1/namespaces/tenant-ns/configmaps/settings",
        )
        .await;
        assert_eq!(body, "virtual");

        let (_, body) = send(filter(gateway.clone(), rules), "GET", "/version").await;
        assert_eq!(body, "virtual");
        assert!(gateway.uris().is_empty());
    }

    #[tokio::test]
    async fn test_denied_exec_is_not_translated_or_forwarded() {
        let gateway = Arc::new(Recording::default());
        let admission: Arc<dyn AdmissionInterface> = Arc::new(
            AdmissionChain::new().with_plugin(Arc::new(DenyConnect::new([ConnectSubresource::Exec]))),
        );
        let filter = filter(gateway.clone(), vec![RedirectRule::any()]).with_admission(Some(admission));

        let (status, body) = send(
            filter,
            "POST",
            "/api/v1/namespaces/tenant-ns/pods/web/exec?command=sh",
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        let status: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["reason"], "Forbidden");
        assert!(gateway.uris().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_exec_keeps_subresource() {
        let gateway = Arc::new(Recording::default());
        let admission: Arc<dyn AdmissionInterface> =
            Arc::new(DenyConnect::new([ConnectSubresource::Attach]));
        let filter = filter(gateway.clone(), vec![RedirectRule::any()]).with_admission(Some(admission));

        let (status, _) = send(
            filter,
            "POST",
            "/api/v1/namespaces/tenant-ns/pods/web/exec?command=sh&stdin=true",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            gateway.uris(),
            vec!["/api/v1/namespaces/host-ns/pods/web-x7f2/exec?command=sh&stdin=true"]
        );
    }

    #[tokio::test]
    async fn test_namespace_required_for_namespaced_resources() {
        let gateway = Arc::new(Recording::default());
        let (status, body) = send(
            filter(gateway.clone(), vec![RedirectRule::any()]),
            "GET",
            "/api/v1/pods",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("namespace required"));
        assert!(gateway.uris().is_empty());
    }

    #[tokio::test]
    async fn test_nodes_are_forwarded_unchanged() {
        let gateway = Arc::new(Recording::default());
        let (status, _) = send(
            filter(gateway.clone(), vec![RedirectRule::new("", "v1", "nodes", "*", "*")]),
            "GET",
            "/api/v1/nodes/node-1",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(gateway.uris(), vec!["/api/v1/nodes/node-1"]);
    }

    #[tokio::test]
    async fn test_anonymous_request_is_not_redirected_when_users_are_required() {
        let gateway = Arc::new(Recording::default());
        let filter = filter(gateway.clone(), vec![RedirectRule::any()]).require_authenticated(true);

        let (status, body) = send(
            filter,
            "POST",
            "/api/v1/namespaces/tenant-ns/pods/web/exec?command=sh",
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let status: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["reason"], "Unauthorized");
        assert!(gateway.uris().is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_request_is_redirected_when_users_are_required() {
        let gateway = Arc::new(Recording::default());
        let service = tower::ServiceBuilder::new()
            .layer(RequestInfoLayer::new())
            .layer(RedirectLayer::new(
                filter(gateway.clone(), vec![RedirectRule::any()]).require_authenticated(true),
            ))
            .service(virtual_cluster());

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/namespaces/tenant-ns/pods/web/log")
            .extension(UserInfo {
                username: Some("alice".to_string()),
                ..Default::default()
            })
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            gateway.uris(),
            vec!["/api/v1/namespaces/host-ns/pods/web-x7f2/log"]
        );
    }

    #[tokio::test]
    async fn test_missing_request_info_is_internal_error() {
        let gateway = Arc::new(Recording::default());
        let service = RedirectLayer::new(filter(gateway.clone(), vec![RedirectRule::any()]))
            .layer(virtual_cluster());

        let request = Request::builder()
            .uri("/api/v1/namespaces/tenant-ns/pods/web")
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(gateway.uris().is_empty());
    }
}
