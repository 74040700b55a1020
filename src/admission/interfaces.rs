//! Admission plugin interfaces.
//!
//! The gateway is a caller of admission, not a decision engine: plugins are injected at
//! construction and asked whether they handle an operation, then (if they validate) asked
//! to validate a set of attributes.

use async_trait::async_trait;
use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

use crate::admission::attributes::{AdmissionAttributes, ObjectInterfaces};
use crate::core::error::RedirectError;

/// Result type for admission decisions
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Kind of resource operation being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Interactive sub-resource access such as pod exec
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Connect => write!(f, "CONNECT"),
        }
    }
}

/// A rejection from an admission plugin
///
/// Carries the HTTP status and Kubernetes reason the client should see.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AdmissionError {
    pub code: StatusCode,
    pub reason: String,
    pub message: String,
}

impl AdmissionError {
    /// `<resource> "<name>" is forbidden: <reason>`, the API server's wording
    pub fn forbidden(attributes: &AdmissionAttributes, reason: impl fmt::Display) -> Self {
        Self {
            code: StatusCode::FORBIDDEN,
            reason: "Forbidden".to_string(),
            message: format!(
                "{} \"{}\" is forbidden: {}",
                attributes.qualified_resource(),
                attributes.name,
                reason
            ),
        }
    }

    /// Malformed request detected by a plugin
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            reason: "BadRequest".to_string(),
            message: message.into(),
        }
    }
}

impl From<AdmissionError> for RedirectError {
    fn from(err: AdmissionError) -> Self {
        RedirectError::Admission {
            code: err.code.as_u16(),
            reason: err.reason,
            message: err.message,
        }
    }
}

/// An admission plugin
pub trait AdmissionInterface: Send + Sync {
    /// Whether this plugin has an opinion about the operation
    fn handles(&self, operation: Operation) -> bool;

    /// The validating side of this plugin, if it has one
    fn as_validating(&self) -> Option<&dyn ValidationInterface> {
        None
    }
}

/// A plugin that can reject requests without modifying them
#[async_trait]
pub trait ValidationInterface: Send + Sync {
    /// Reject the request by returning an error
    async fn validate(
        &self,
        attributes: &AdmissionAttributes,
        interfaces: &ObjectInterfaces,
    ) -> AdmissionResult<()>;
}
