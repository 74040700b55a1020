//! # Error Handling Module
//!
//! This module defines every error the redirect pipeline can produce, using the `thiserror`
//! crate, together with the mapping from each error onto an HTTP status code and a
//! Kubernetes `Status` reason.
//!
//! Clients of the gateway are Kubernetes API clients (kubectl, controllers, client libraries),
//! so error bodies are rendered as `meta/v1` `Status` objects rather than an ad-hoc JSON shape.
//! The body is content-negotiated: JSON by default, YAML when the client asks for it.
//!
//! ## Rust Concepts Used
//!
//! - `Result<T, E>` with the `?` operator for propagation instead of exceptions
//! - Enum variants carry the data needed to render the error (status, reason, message)
//! - `From` implementations let `?` convert library errors automatically
//! - `IntoResponse` lets Axum turn an error straight into an HTTP response

use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use std::convert::Infallible;
use thiserror::Error;

/// Result type used throughout the gateway
pub type RedirectResult<T> = Result<T, RedirectError>;

/// Errors produced while classifying, admitting, translating or forwarding a request
#[derive(Debug, Error, Clone)]
pub enum RedirectError {
    /// The request-info stage did not run before the redirect filter.
    /// This is a wiring error in the middleware stack, never a client error.
    #[error("request info is missing")]
    RequestInfoMissing,

    /// A namespaced resource was addressed without a namespace
    #[error("namespace required")]
    NamespaceRequired,

    /// The request path does not have the canonical namespaced shape
    #[error("unexpected url")]
    UnexpectedUrl { path: String },

    /// Connect options in the query string could not be decoded
    #[error("{message}")]
    InvalidParameters { message: String },

    /// An admission plugin rejected the request; status and reason are carried verbatim
    #[error("{message}")]
    Admission {
        code: u16,
        reason: String,
        message: String,
    },

    /// The bearer token presented by the caller was rejected
    #[error("Unauthorized")]
    Unauthenticated { reason: String },

    /// The proxying transport could not be constructed from its connection config
    #[error("failed to build transport for {cluster}: {message}")]
    Transport { cluster: String, message: String },

    /// The upstream API server could not be reached or the exchange failed mid-way
    #[error("error trying to reach service: {message}")]
    Upstream { message: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, network errors, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl RedirectError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an unexpected-url error for the given request path
    pub fn unexpected_url<S: Into<String>>(path: S) -> Self {
        Self::UnexpectedUrl { path: path.into() }
    }

    /// Create an invalid-parameters error for undecodable query options
    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Create a transport construction error
    pub fn transport<C: Into<String>, S: Into<String>>(cluster: C, message: S) -> Self {
        Self::Transport {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Create an upstream dispatch error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create an authentication failure
    pub fn unauthenticated<S: Into<String>>(reason: S) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestInfoMissing => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NamespaceRequired => StatusCode::BAD_REQUEST,
            Self::UnexpectedUrl { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidParameters { .. } => StatusCode::BAD_REQUEST,
            Self::Admission { code, .. } => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::FORBIDDEN)
            }
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Kubernetes `StatusReason` for this error
    pub fn reason(&self) -> &str {
        match self {
            Self::Admission { reason, .. } => reason,
            Self::Unauthenticated { .. } => "Unauthorized",
            Self::Upstream { .. } => "ServiceUnavailable",
            other => match other.status_code() {
                StatusCode::BAD_REQUEST => "BadRequest",
                _ => "InternalError",
            },
        }
    }

    /// Render this error as a Kubernetes `Status` object
    pub fn to_status(&self) -> Status {
        Status {
            status: Some("Failure".to_string()),
            code: Some(i32::from(self.status_code().as_u16())),
            reason: Some(self.reason().to_string()),
            message: Some(self.to_string()),
            ..Default::default()
        }
    }

    /// Render this error with the body format the client accepts
    ///
    /// YAML is chosen only when the `Accept` header asks for it explicitly; every other
    /// value, including wildcards and protobuf, falls back to JSON which all clients read.
    pub fn into_negotiated_response(self, headers: &HeaderMap) -> Response {
        let wants_yaml = headers
            .get(ACCEPT)
            .and_then(|value| value.to_str().ok())
            .map(|accept| {
                accept
                    .split(',')
                    .any(|media| media.trim().starts_with("application/yaml"))
            })
            .unwrap_or(false);

        let status = self.status_code();
        let body = self.to_status();

        let (content_type, rendered) = if wants_yaml {
            match serde_yaml::to_string(&body) {
                Ok(yaml) => ("application/yaml", yaml),
                Err(_) => ("application/json", render_json(&body)),
            }
        } else {
            ("application/json", render_json(&body))
        };

        let mut response = Response::new(Body::from(rendered));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }
}

fn render_json(status: &Status) -> String {
    serde_json::to_string(status).unwrap_or_else(|_| {
        r#"{"kind":"Status","apiVersion":"v1","status":"Failure","code":500}"#.to_string()
    })
}

impl From<Infallible> for RedirectError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for RedirectError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RedirectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RedirectError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for RedirectError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            message: err.to_string(),
        }
    }
}

/// Errors without request headers at hand are rendered as JSON
impl IntoResponse for RedirectError {
    fn into_response(self) -> Response {
        self.into_negotiated_response(&HeaderMap::new())
    }
}
