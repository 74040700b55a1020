//! Attributes handed to admission plugins, and the type information they may consult.

use kube::core::{GroupVersionKind, GroupVersionResource};
use std::collections::HashMap;
use std::sync::Arc;

use crate::admission::connect::ConnectOptions;
use crate::admission::interfaces::Operation;
use crate::core::types::UserInfo;

/// Everything an admission plugin learns about a request
///
/// Built once per admitted request and dropped when validation returns.
#[derive(Debug, Clone)]
pub struct AdmissionAttributes {
    /// The decoded connect options
    pub object: ConnectOptions,

    /// Connect requests never have a previous object
    pub old_object: Option<ConnectOptions>,

    /// Kind of `object`
    pub kind: GroupVersionKind,

    pub namespace: String,
    pub name: String,

    /// Resource the request addresses
    pub resource: GroupVersionResource,

    pub subresource: String,
    pub operation: Operation,
    pub dry_run: bool,

    /// Authenticated principal, `None` for anonymous callers
    pub user_info: Option<UserInfo>,
}

impl AdmissionAttributes {
    /// Attributes for a connect request against `resource/name/subresource`
    pub fn connect(
        object: ConnectOptions,
        namespace: &str,
        name: &str,
        resource: GroupVersionResource,
        subresource: &str,
        user_info: Option<UserInfo>,
    ) -> Self {
        Self {
            kind: object.kind(),
            object,
            old_object: None,
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource,
            subresource: subresource.to_string(),
            operation: Operation::Connect,
            dry_run: false,
            user_info,
        }
    }

    /// `resource` or `resource.group`, as used in API server messages
    pub fn qualified_resource(&self) -> String {
        if self.resource.group.is_empty() {
            self.resource.resource.clone()
        } else {
            format!("{}.{}", self.resource.resource, self.resource.group)
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.user_info.as_ref().and_then(|u| u.username.as_deref())
    }

    pub fn groups(&self) -> &[String] {
        self.user_info
            .as_ref()
            .and_then(|u| u.groups.as_deref())
            .unwrap_or(&[])
    }
}

/// Resource to kind mapping for the virtual cluster's API surface
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
    kinds: HashMap<GroupVersionResource, GroupVersionKind>,
}

impl RestMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper preloaded with the core/v1 resources a virtual cluster serves
    pub fn core_v1() -> Self {
        let mut mapper = Self::new();
        for (resource, kind) in [
            ("pods", "Pod"),
            ("services", "Service"),
            ("endpoints", "Endpoints"),
            ("configmaps", "ConfigMap"),
            ("secrets", "Secret"),
            ("serviceaccounts", "ServiceAccount"),
            ("persistentvolumeclaims", "PersistentVolumeClaim"),
            ("persistentvolumes", "PersistentVolume"),
            ("events", "Event"),
            ("namespaces", "Namespace"),
            ("nodes", "Node"),
        ] {
            mapper.add(
                GroupVersionResource::gvr("", "v1", resource),
                GroupVersionKind::gvk("", "v1", kind),
            );
        }
        mapper
    }

    pub fn add(&mut self, resource: GroupVersionResource, kind: GroupVersionKind) {
        self.kinds.insert(resource, kind);
    }

    pub fn kind_for(&self, resource: &GroupVersionResource) -> Option<&GroupVersionKind> {
        self.kinds.get(resource)
    }
}

/// Type information bound to the virtual cluster, shared by every admission call
#[derive(Debug, Clone)]
pub struct ObjectInterfaces {
    mapper: Arc<RestMapper>,
}

impl ObjectInterfaces {
    pub fn new(mapper: RestMapper) -> Self {
        Self {
            mapper: Arc::new(mapper),
        }
    }

    pub fn rest_mapper(&self) -> &RestMapper {
        &self.mapper
    }
}

impl Default for ObjectInterfaces {
    fn default() -> Self {
        Self::new(RestMapper::core_v1())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::connect::PodExecOptions;

    #[test]
    fn test_connect_attributes() {
        let user = UserInfo {
            username: Some("dev".to_string()),
            groups: Some(vec!["system:authenticated".to_string()]),
            ..Default::default()
        };
        let attrs = AdmissionAttributes::connect(
            ConnectOptions::Exec(PodExecOptions::default()),
            "team-a",
            "web",
            GroupVersionResource::gvr("", "v1", "pods"),
            "exec",
            Some(user),
        );

        assert_eq!(attrs.operation, Operation::Connect);
        assert_eq!(attrs.kind, GroupVersionKind::gvk("", "v1", "PodExecOptions"));
        assert!(attrs.old_object.is_none());
        assert!(!attrs.dry_run);
        assert_eq!(attrs.qualified_resource(), "pods");
        assert_eq!(attrs.username(), Some("dev"));
        assert_eq!(attrs.groups(), ["system:authenticated".to_string()]);
    }

    #[test]
    fn test_core_rest_mapper() {
        let interfaces = ObjectInterfaces::default();
        let mapper = interfaces.rest_mapper();

        let pods = GroupVersionResource::gvr("", "v1", "pods");
        assert_eq!(
            mapper.kind_for(&pods),
            Some(&GroupVersionKind::gvk("", "v1", "Pod"))
        );
        assert_eq!(
            mapper.kind_for(&GroupVersionResource::gvr("", "v1", "nodes")),
            Some(&GroupVersionKind::gvk("", "v1", "Node"))
        );
        assert!(mapper
            .kind_for(&GroupVersionResource::gvr("apps", "v1", "deployments"))
            .is_none());
    }
}
