//! # Translate Module
//!
//! Rewrites the identity of a redirected request. Tenant objects live in one shared physical
//! namespace under mapped names, so a request for `namespaces/<tenant-ns>/pods/<name>` has to
//! be sent to `namespaces/<target-ns>/pods/<physical-name>` instead.
//!
//! Only the canonical namespaced layouts are rewritten:
//!
//! ```text
//! /api/<version>/namespaces/<ns>/<resource>/<name>[/<subresource>...]
//! /apis/<group>/<version>/namespaces/<ns>/<resource>/<name>[/<subresource>...]
//! ```
//!
//! Anything else addressed at a namespaced resource is refused rather than guessed at.
//!
//! ## Rust Concepts Used
//!
//! - Borrowed path segments (`Vec<&str>`) are rewritten without copying the untouched ones
//! - The input `Uri` is never mutated; a new one is returned

pub mod names;

pub use names::{safe_concat_name, NameMapper, SuffixNameMapper, MAX_NAME_LENGTH};

use axum::http::uri::{PathAndQuery, Uri};

use crate::core::error::{RedirectError, RedirectResult};
use crate::core::types::RequestInfo;

/// Resources passed through without identity rewriting
const CLUSTER_SCOPED: &[&str] = &["nodes"];

/// Minimum number of `/`-separated segments of a rewritable path
const MIN_SEGMENTS: usize = 6;

/// Compute the physical URI for a redirected request
///
/// The query string, scheme and authority are preserved. When the object name is the last
/// path segment a trailing `/` is appended, so the physical API server does not answer with a
/// redirect to the un-rewritten location.
pub fn translate(
    uri: &Uri,
    info: &RequestInfo,
    target_namespace: &str,
    mapper: &dyn NameMapper,
) -> RedirectResult<Uri> {
    if CLUSTER_SCOPED.contains(&info.resource.as_str()) {
        return Ok(uri.clone());
    }

    if info.namespace.is_empty() {
        return Err(RedirectError::NamespaceRequired);
    }

    let path = uri.path();
    let mut segments: Vec<&str> = path.split('/').collect();
    if segments.len() < MIN_SEGMENTS {
        return Err(RedirectError::unexpected_url(path));
    }

    let namespace_index = match segments[1] {
        "api" => 4,
        "apis" => 5,
        _ => return Err(RedirectError::unexpected_url(path)),
    };
    let name_index = namespace_index + 2;

    let well_formed = segments.len() > name_index
        && segments[namespace_index - 1] == "namespaces"
        && segments[namespace_index] == info.namespace
        && segments[namespace_index + 1] == info.resource
        && !segments[name_index].is_empty();
    if !well_formed {
        return Err(RedirectError::unexpected_url(path));
    }

    let physical_name = mapper.physical_name(segments[name_index], &info.namespace);
    let name_is_last = segments.len() == name_index + 1;

    segments[namespace_index] = target_namespace;
    segments[name_index] = &physical_name;

    let mut rewritten = segments.join("/");
    if name_is_last {
        rewritten.push('/');
    }
    if let Some(query) = uri.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(rewritten)
            .map_err(|e| RedirectError::internal(format!("invalid rewritten path: {}", e)))?,
    );
    Uri::from_parts(parts).map_err(|e| RedirectError::internal(format!("invalid rewritten uri: {}", e)))
}
