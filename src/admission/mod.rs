//! # Admission Module
//!
//! Pre-forward admission for redirected pod connect requests (`exec`, `attach`,
//! `portforward`). The gateway only calls admission plugins; decisions live in the plugins,
//! which are injected at construction time.
//!
//! ## Rust Concepts Used
//!
//! - Trait objects (`Arc<dyn AdmissionInterface>`) for runtime-selected plugins
//! - `async_trait` for async methods on object-safe traits
//! - Optional capabilities exposed through `as_validating()` rather than downcasting

pub mod attributes;
pub mod chain;
pub mod connect;
pub mod deny_connect;
pub mod dispatch;
pub mod interfaces;

pub use attributes::{AdmissionAttributes, ObjectInterfaces, RestMapper};
pub use chain::AdmissionChain;
pub use connect::{
    ConnectOptions, ConnectSubresource, ParameterCodec, PodAttachOptions, PodExecOptions,
    PodPortForwardOptions,
};
pub use deny_connect::DenyConnect;
pub use dispatch::maybe_admit;
pub use interfaces::{
    AdmissionError, AdmissionInterface, AdmissionResult, Operation, ValidationInterface,
};

use std::sync::Arc;

use crate::core::config::AdmissionConfig;

/// Build the configured plugin chain, `None` when no plugin is enabled
pub fn from_config(config: &AdmissionConfig) -> Option<Arc<dyn AdmissionInterface>> {
    let mut chain = AdmissionChain::new();
    if let Some(deny) = &config.deny_connect {
        chain.push(Arc::new(DenyConnect::from_config(deny)));
    }

    if chain.is_empty() {
        None
    } else {
        Some(Arc::new(chain))
    }
}
