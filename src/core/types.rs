//! # Core Types Module
//!
//! Request-scoped data shared between the middleware stages. Every value here is attached to
//! a request as an `http::Extensions` entry by one stage and read by a later one, so the
//! stages stay decoupled: the redirect filter never parses paths itself and never talks to
//! the authenticator directly.

use serde::{Deserialize, Serialize};

pub use k8s_openapi::api::authentication::v1::UserInfo;

/// Parsed description of a Kubernetes API request
///
/// Produced once per request by the request-info stage and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Whether the path addresses an API resource (as opposed to discovery, healthz, ...)
    pub is_resource_request: bool,

    /// Raw URL path of the request
    pub path: String,

    /// Kubernetes verb (get, list, watch, create, update, patch, delete, deletecollection, ...)
    pub verb: String,

    /// API prefix, `api` or `apis`
    pub api_prefix: String,

    /// API group, empty for the core group
    pub api_group: String,

    /// API version
    pub api_version: String,

    /// Namespace, empty for cluster-scoped requests
    pub namespace: String,

    /// Plural resource name
    pub resource: String,

    /// Sub-resource (exec, log, status, ...)
    pub subresource: String,

    /// Resource name, empty for collection requests
    pub name: String,

    /// Path segments starting at the resource
    pub parts: Vec<String>,
}

impl RequestInfo {
    /// Create a descriptor for a non-resource path
    pub fn non_resource(path: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            is_resource_request: false,
            path: path.into(),
            verb: verb.into(),
            ..Default::default()
        }
    }

    /// `group/version`, or just `version` for the core group
    pub fn group_version(&self) -> String {
        if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        }
    }
}

/// Display name of a principal for logging
pub fn username(user: Option<&UserInfo>) -> &str {
    user.and_then(|user| user.username.as_deref())
        .unwrap_or("system:anonymous")
}
