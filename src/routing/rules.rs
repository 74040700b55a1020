//! # Redirect Rules
//!
//! Decides whether a request is redirected to the physical cluster. A rule is a five-field
//! pattern over (group, version, resource, sub-resource, verb); each field is either a literal
//! or the wildcard `*`. Matching is an existential predicate: a request is redirected when
//! any rule matches it, so rule order never changes the outcome.
//!
//! ## Rust Concepts Used
//!
//! - Slices (`&[T]`) let the matcher borrow the configured rules without copying them
//! - Iterator adapters (`any`) short-circuit on the first match

use serde::{Deserialize, Serialize};

use crate::core::types::RequestInfo;

/// Token that matches any value in a rule field
pub const WILDCARD: &str = "*";

/// One entry of the redirect allow-list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedirectRule {
    /// API group (`""` is the core group)
    pub group: String,

    /// API version
    pub version: String,

    /// Plural resource name
    pub resource: String,

    /// Sub-resource (`""` matches requests without one)
    #[serde(default)]
    pub sub_resource: String,

    /// Kubernetes verb
    pub verb: String,
}

impl RedirectRule {
    /// Create a rule from its five fields
    pub fn new(group: &str, version: &str, resource: &str, sub_resource: &str, verb: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            sub_resource: sub_resource.to_string(),
            verb: verb.to_string(),
        }
    }

    /// A rule that matches every resource request
    pub fn any() -> Self {
        Self::new(WILDCARD, WILDCARD, WILDCARD, WILDCARD, WILDCARD)
    }

    /// Check this rule against a parsed request
    ///
    /// Comparison is exact and case-sensitive.
    pub fn matches(&self, info: &RequestInfo) -> bool {
        field_matches(&self.group, &info.api_group)
            && field_matches(&self.version, &info.api_version)
            && field_matches(&self.resource, &info.resource)
            && field_matches(&self.sub_resource, &info.subresource)
            && field_matches(&self.verb, &info.verb)
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

/// Whether the request must be redirected
///
/// Non-resource requests (discovery, health checks, version) are never redirected.
pub fn applies(info: &RequestInfo, rules: &[RedirectRule]) -> bool {
    if !info.is_resource_request {
        return false;
    }

    rules.iter().any(|rule| rule.matches(info))
}
