//! # DenyConnect Admission Plugin
//!
//! Rejects selected interactive pod sub-resources (for example `exec` in a tenant that must
//! not run commands in workloads), unless the caller belongs to an exempt group such as
//! `system:masters`.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::admission::attributes::{AdmissionAttributes, ObjectInterfaces};
use crate::admission::connect::ConnectSubresource;
use crate::admission::interfaces::{
    AdmissionError, AdmissionInterface, AdmissionResult, Operation, ValidationInterface,
};
use crate::core::config::DenyConnectConfig;

#[derive(Debug, Clone, Default)]
pub struct DenyConnect {
    denied: HashSet<ConnectSubresource>,
    exempt_groups: HashSet<String>,
}

impl DenyConnect {
    pub fn new(denied: impl IntoIterator<Item = ConnectSubresource>) -> Self {
        Self {
            denied: denied.into_iter().collect(),
            exempt_groups: HashSet::new(),
        }
    }

    pub fn with_exempt_group(mut self, group: impl Into<String>) -> Self {
        self.exempt_groups.insert(group.into());
        self
    }

    /// Build from config; unknown sub-resource names are ignored (config validation rejects them)
    pub fn from_config(config: &DenyConnectConfig) -> Self {
        Self {
            denied: config
                .subresources
                .iter()
                .filter_map(|s| ConnectSubresource::from_subresource(s))
                .collect(),
            exempt_groups: config.exempt_groups.iter().cloned().collect(),
        }
    }

    fn is_exempt(&self, attributes: &AdmissionAttributes) -> bool {
        attributes
            .groups()
            .iter()
            .any(|group| self.exempt_groups.contains(group))
    }
}

impl AdmissionInterface for DenyConnect {
    fn handles(&self, operation: Operation) -> bool {
        operation == Operation::Connect && !self.denied.is_empty()
    }

    fn as_validating(&self) -> Option<&dyn ValidationInterface> {
        Some(self)
    }
}

#[async_trait]
impl ValidationInterface for DenyConnect {
    async fn validate(
        &self,
        attributes: &AdmissionAttributes,
        interfaces: &ObjectInterfaces,
    ) -> AdmissionResult<()> {
        let subresource = attributes.object.subresource();
        if !self.denied.contains(&subresource) || self.is_exempt(attributes) {
            return Ok(());
        }

        let message = match interfaces.rest_mapper().kind_for(&attributes.resource) {
            Some(kind) => format!(
                "{} is not allowed in this cluster for {} objects",
                subresource.as_str(),
                kind.kind
            ),
            None => format!("{} is not allowed in this cluster", subresource.as_str()),
        };
        Err(AdmissionError::forbidden(attributes, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::RestMapper;
    use crate::admission::connect::{ConnectOptions, PodExecOptions, PodPortForwardOptions};
    use crate::core::types::UserInfo;
    use kube::core::GroupVersionResource;

    fn attributes(options: ConnectOptions, groups: &[&str]) -> AdmissionAttributes {
        let subresource = options.subresource().as_str();
        let user = UserInfo {
            username: Some("dev".to_string()),
            groups: Some(groups.iter().map(|g| g.to_string()).collect()),
            ..Default::default()
        };
        AdmissionAttributes::connect(
            options,
            "team-a",
            "web",
            GroupVersionResource::gvr("", "v1", "pods"),
            subresource,
            Some(user),
        )
    }

    #[tokio::test]
    async fn test_denies_listed_subresource() {
        let plugin = DenyConnect::new([ConnectSubresource::Exec]);
        let attrs = attributes(ConnectOptions::Exec(PodExecOptions::default()), &[]);

        let err = plugin
            .validate(&attrs, &ObjectInterfaces::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.message,
            "pods \"web\" is forbidden: exec is not allowed in this cluster for Pod objects"
        );
        assert_eq!(err.code, axum::http::StatusCode::FORBIDDEN);

        let unmapped = plugin
            .validate(&attrs, &ObjectInterfaces::new(RestMapper::new()))
            .await
            .unwrap_err();
        assert_eq!(
            unmapped.message,
            "pods \"web\" is forbidden: exec is not allowed in this cluster"
        );
    }

    #[tokio::test]
    async fn test_allows_other_subresources_and_exempt_groups() {
        let plugin =
            DenyConnect::new([ConnectSubresource::Exec]).with_exempt_group("system:masters");
        let interfaces = ObjectInterfaces::default();

        let forward = attributes(
            ConnectOptions::PortForward(PodPortForwardOptions { ports: vec![80] }),
            &[],
        );
        assert!(plugin.validate(&forward, &interfaces).await.is_ok());

        let admin = attributes(
            ConnectOptions::Exec(PodExecOptions::default()),
            &["system:authenticated", "system:masters"],
        );
        assert!(plugin.validate(&admin, &interfaces).await.is_ok());
    }

    #[test]
    fn test_from_config() {
        let plugin = DenyConnect::from_config(&DenyConnectConfig {
            subresources: vec!["attach".to_string(), "portforward".to_string()],
            exempt_groups: vec!["ops".to_string()],
        });
        assert!(plugin.handles(Operation::Connect));
        assert!(!plugin.handles(Operation::Create));
        assert!(plugin.denied.contains(&ConnectSubresource::Attach));
        assert!(!plugin.denied.contains(&ConnectSubresource::Exec));

        assert!(!DenyConnect::default().handles(Operation::Connect));
    }
}
