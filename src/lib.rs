//! # Tenant Gateway Library - Core Library Crate
//!
//! An API-server front for virtual Kubernetes clusters. Every request is served by the
//! tenant's virtual API server, except the ones matched by redirect rules: those are
//! rewritten into the shared physical namespace and sent to the physical API server.
//!
//! ## Request Flow
//!
//! ```text
//! client -> request info -> authentication -> redirect filter -+-> virtual cluster
//!                                                              |
//!                                  admission -> translate -----+-> physical cluster
//! ```
//!
//! ## Module Layout
//!
//! - `core`: errors, configuration and request metadata shared by everything else
//! - `routing`: the rules deciding which requests leave the virtual cluster
//! - `admission`: validation of connect requests (exec, attach, port-forward)
//! - `translate`: tenant namespace and name mapping into the physical cluster
//! - `protocols`: HTTP forwarding, including upgraded streams
//! - `middleware`: the Tower layers the gateway is assembled from
//! - `gateway`: router construction and the server loop
//! - `observability`: logging and metrics setup

/// Error type, configuration and request metadata
pub mod core;

/// Admission plugin interfaces, attributes and built-in plugins
pub mod admission;

/// Redirect rules and rule matching
pub mod routing;

/// URL rewriting from tenant namespaces into the physical namespace
pub mod translate;

/// Upstream transports and forwarders for both clusters
pub mod protocols;

/// Tower layers: request info, authentication, redirect
pub mod middleware;

/// Router assembly and the HTTP server
pub mod gateway;

/// Logging and Prometheus metrics
pub mod observability;

// Re-export commonly used types for easier access

/// Main error type used throughout the gateway
pub use core::error::{RedirectError, RedirectResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

/// Request metadata attached to every request
pub use core::types::RequestInfo;

/// Primary entry points for running the gateway
pub use gateway::server::{build_router, GatewayComponents, GatewayServer};
