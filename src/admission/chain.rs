//! Composition of several admission plugins into one.

use async_trait::async_trait;
use std::sync::Arc;

use crate::admission::attributes::{AdmissionAttributes, ObjectInterfaces};
use crate::admission::interfaces::{
    AdmissionInterface, AdmissionResult, Operation, ValidationInterface,
};

/// Ordered list of plugins presented as a single plugin
///
/// Handles an operation when any member does. Validation asks each member that handles the
/// request's operation, in order, and returns the first denial.
#[derive(Clone, Default)]
pub struct AdmissionChain {
    plugins: Vec<Arc<dyn AdmissionInterface>>,
}

impl AdmissionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn AdmissionInterface>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn push(&mut self, plugin: Arc<dyn AdmissionInterface>) {
        self.plugins.push(plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl AdmissionInterface for AdmissionChain {
    fn handles(&self, operation: Operation) -> bool {
        self.plugins.iter().any(|plugin| plugin.handles(operation))
    }

    fn as_validating(&self) -> Option<&dyn ValidationInterface> {
        Some(self)
    }
}

#[async_trait]
impl ValidationInterface for AdmissionChain {
    async fn validate(
        &self,
        attributes: &AdmissionAttributes,
        interfaces: &ObjectInterfaces,
    ) -> AdmissionResult<()> {
        for plugin in &self.plugins {
            if !plugin.handles(attributes.operation) {
                continue;
            }
            if let Some(validator) = plugin.as_validating() {
                validator.validate(attributes, interfaces).await?;
            }
        }
        Ok(())
    }
}
