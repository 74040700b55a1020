//! # Request Info Middleware
//!
//! Classifies every inbound request the way the Kubernetes API server does and attaches the
//! resulting [`RequestInfo`] to the request extensions, where later stages read it.
//!
//! ```text
//! /api/v1/namespaces/team-a/pods/web/exec      -> create pods/exec "web" in team-a
//! /apis/apps/v1/namespaces/team-a/deployments  -> list apps/v1 deployments in team-a
//! /api/v1/watch/nodes                          -> watch nodes
//! /healthz                                     -> non-resource
//! ```
//!
//! ## Rust Concepts Used
//!
//! - A `Layer`/`Service` pair that forwards the inner future unchanged (`type Future = S::Future`)
//! - Slice patterns and `split_first` to consume path segments

use axum::http::{Method, Request, Uri};
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::core::types::RequestInfo;

const API_PREFIXES: &[&str] = &["api", "apis"];

/// Prefixes without a group segment
const GROUPLESS_PREFIXES: &[&str] = &["api"];

/// Verbs that appear as a path segment right after the version
const SPECIAL_VERBS: &[&str] = &["proxy", "watch"];

/// Special verbs whose trailing segments are not a sub-resource
const NO_SUBRESOURCE_VERBS: &[&str] = &["proxy"];

/// Sub-resources of a namespace itself
const NAMESPACE_SUBRESOURCES: &[&str] = &["status", "finalize"];

/// Resolve the Kubernetes view of a request from its method and URI
pub fn resolve(method: &Method, uri: &Uri) -> RequestInfo {
    let path = uri.path();
    let non_resource = RequestInfo::non_resource(path, method.as_str().to_ascii_lowercase());

    let segments: Vec<&str> = {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        }
    };
    if segments.len() < 3 || !API_PREFIXES.contains(&segments[0]) {
        return non_resource;
    }

    let mut info = RequestInfo {
        path: path.to_string(),
        api_prefix: segments[0].to_string(),
        ..Default::default()
    };
    let mut rest = &segments[1..];

    if !GROUPLESS_PREFIXES.contains(&segments[0]) {
        if rest.len() < 3 {
            return non_resource;
        }
        info.api_group = rest[0].to_string();
        rest = &rest[1..];
    }

    info.is_resource_request = true;
    info.api_version = rest[0].to_string();
    rest = &rest[1..];

    if SPECIAL_VERBS.contains(&rest[0]) {
        if rest.len() < 2 {
            return non_resource;
        }
        info.verb = rest[0].to_string();
        rest = &rest[1..];
    } else {
        info.verb = verb_for(method).to_string();
    }

    if rest[0] == "namespaces" {
        if rest.len() > 1 {
            info.namespace = rest[1].to_string();
            if rest.len() > 2 && !NAMESPACE_SUBRESOURCES.contains(&rest[2]) {
                rest = &rest[2..];
            }
        }
    }

    info.parts = rest.iter().map(|s| s.to_string()).collect();

    if rest.len() >= 3 && !NO_SUBRESOURCE_VERBS.contains(&info.verb.as_str()) {
        info.subresource = rest[2].to_string();
    }
    if rest.len() >= 2 {
        info.name = rest[1].to_string();
    }
    if let Some(resource) = rest.first() {
        info.resource = resource.to_string();
    }

    if info.name.is_empty() && info.verb == "get" {
        let query = Query::parse(uri.query());
        info.verb = if query.watch { "watch" } else { "list" }.to_string();
        if let Some(name) = query.name_selector {
            info.name = name;
        }
    }
    if info.name.is_empty() && info.verb == "delete" {
        info.verb = "deletecollection".to_string();
    }

    info
}

fn verb_for(method: &Method) -> &'static str {
    match *method {
        Method::POST => "create",
        Method::GET | Method::HEAD => "get",
        Method::PUT => "update",
        Method::PATCH => "patch",
        Method::DELETE => "delete",
        _ => "",
    }
}

/// The list options that influence classification
#[derive(Debug, Default)]
struct Query {
    watch: bool,
    name_selector: Option<String>,
}

impl Query {
    fn parse(query: Option<&str>) -> Self {
        let mut parsed = Self::default();
        let Some(query) = query else {
            return parsed;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "watch" => parsed.watch = value == "true" || value == "1",
                "fieldSelector" => {
                    parsed.name_selector = value.split(',').find_map(|requirement| {
                        let requirement = requirement.trim();
                        requirement
                            .strip_prefix("metadata.name==")
                            .or_else(|| requirement.strip_prefix("metadata.name="))
                            .map(str::to_string)
                    });
                }
                _ => {}
            }
        }
        parsed
    }
}

/// Layer that attaches [`RequestInfo`] to every request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestInfoLayer;

impl RequestInfoLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestInfoLayer {
    type Service = RequestInfoService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestInfoService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestInfoService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RequestInfoService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let info = resolve(request.method(), request.uri());
        request.extensions_mut().insert(info);
        self.inner.call(request)
    }
}
