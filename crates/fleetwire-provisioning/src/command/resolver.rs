//! Command target resolution.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{DeviceAssignment, DeviceCommandInvocation};
use fleetwire_core::{DeviceManagement, Error, LifecycleComponent, Result};

/// Resolves the assignments an invocation should be delivered to.
#[async_trait]
pub trait CommandTargetResolver: LifecycleComponent {
    async fn resolve_targets(&self, invocation: &DeviceCommandInvocation) -> Result<Vec<DeviceAssignment>>;
}

/// Targets exactly the assignment referenced by the invocation.
pub struct DefaultCommandTargetResolver {
    management: Arc<dyn DeviceManagement>,
}

impl DefaultCommandTargetResolver {
    pub fn new(management: Arc<dyn DeviceManagement>) -> Self {
        Self { management }
    }
}

impl LifecycleComponent for DefaultCommandTargetResolver {
    fn component_name(&self) -> String {
        "Default command target resolver".to_string()
    }
}

#[async_trait]
impl CommandTargetResolver for DefaultCommandTargetResolver {
    async fn resolve_targets(&self, invocation: &DeviceCommandInvocation) -> Result<Vec<DeviceAssignment>> {
        let assignment = self
            .management
            .get_device_assignment_by_token(&invocation.assignment_token)
            .await?
            .ok_or_else(|| Error::AssignmentNotFound(invocation.assignment_token.clone()))?;
        Ok(vec![assignment])
    }
}
