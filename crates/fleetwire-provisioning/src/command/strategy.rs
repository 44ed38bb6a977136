//! Command processing strategy.
//!
//! Turns an invocation into one execution per resolved target and hands
//! each to the router together with the target's nesting context.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{Device, DeviceCommandInvocation, SystemCommand};
use fleetwire_core::{DeviceManagement, Error, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use tracing::debug;

use super::execution::{CommandExecutionBuilder, DefaultCommandExecutionBuilder};
use super::resolver::{CommandTargetResolver, DefaultCommandTargetResolver};
use crate::nesting::NestedDeviceSupport;
use crate::router::OutboundCommandRouter;

/// Resolves, builds and routes commands.
#[async_trait]
pub trait CommandProcessingStrategy: LifecycleComponent {
    async fn deliver_command(
        &self,
        router: &dyn OutboundCommandRouter,
        invocation: &DeviceCommandInvocation,
    ) -> Result<()>;

    /// Deliver a system command to a registered device.
    async fn deliver_system_command(
        &self,
        router: &dyn OutboundCommandRouter,
        hardware_id: &str,
        command: &SystemCommand,
    ) -> Result<()>;

    /// Deliver a system command to a device that may not be persisted.
    async fn deliver_system_command_to_device(
        &self,
        router: &dyn OutboundCommandRouter,
        device: &Device,
        command: &SystemCommand,
    ) -> Result<()>;
}

/// Default strategy backed by the management API.
pub struct DefaultCommandProcessingStrategy {
    management: Arc<dyn DeviceManagement>,
    builder: Arc<dyn CommandExecutionBuilder>,
    resolver: Arc<dyn CommandTargetResolver>,
    state: LifecycleState,
}

impl DefaultCommandProcessingStrategy {
    /// Strategy with the default builder and target resolver.
    pub fn new(management: Arc<dyn DeviceManagement>) -> Self {
        Self {
            builder: Arc::new(DefaultCommandExecutionBuilder::new()),
            resolver: Arc::new(DefaultCommandTargetResolver::new(management.clone())),
            management,
            state: LifecycleState::new(),
        }
    }

    /// Replace the default execution builder.
    pub fn with_execution_builder(mut self, builder: Arc<dyn CommandExecutionBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Replace the default target resolver.
    pub fn with_target_resolver(mut self, resolver: Arc<dyn CommandTargetResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

#[async_trait]
impl LifecycleComponent for DefaultCommandProcessingStrategy {
    fn component_name(&self) -> String {
        "Default command processing strategy".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        let result = async {
            self.builder.start().await?;
            self.resolver.start().await
        }
        .await;
        if let Err(e) = result {
            self.state.set(LifecycleStatus::Error);
            return Err(e);
        }
        self.state.set(LifecycleStatus::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.resolver.stop().await?;
        self.builder.stop().await?;
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl CommandProcessingStrategy for DefaultCommandProcessingStrategy {
    async fn deliver_command(
        &self,
        router: &dyn OutboundCommandRouter,
        invocation: &DeviceCommandInvocation,
    ) -> Result<()> {
        let command = self
            .management
            .get_device_command_by_token(&invocation.command_token)
            .await?
            .ok_or_else(|| Error::CommandNotFound(invocation.command_token.clone()))?;

        let execution = self.builder.create_execution(&command, invocation)?;
        let targets = self.resolver.resolve_targets(invocation).await?;

        for assignment in &targets {
            let device = self
                .management
                .get_device_for_assignment(assignment)
                .await?
                .ok_or_else(|| Error::DeviceNotFound(assignment.device_hardware_id.clone()))?;
            let nesting = NestedDeviceSupport::resolve(&device, self.management.as_ref()).await?;
            debug!(
                command = %command.name,
                hardware_id = %device.hardware_id,
                gateway = %nesting.gateway.hardware_id,
                "Routing command"
            );
            router.route_command(&execution, &nesting, assignment).await?;
        }
        Ok(())
    }

    async fn deliver_system_command(
        &self,
        router: &dyn OutboundCommandRouter,
        hardware_id: &str,
        command: &SystemCommand,
    ) -> Result<()> {
        let device = self
            .management
            .get_device_by_hardware_id(hardware_id)
            .await?
            .ok_or_else(|| Error::DeviceNotFound(hardware_id.to_string()))?;
        self.deliver_system_command_to_device(router, &device, command)
            .await
    }

    async fn deliver_system_command_to_device(
        &self,
        router: &dyn OutboundCommandRouter,
        device: &Device,
        command: &SystemCommand,
    ) -> Result<()> {
        let assignment = self.management.get_current_device_assignment(device).await?;
        let nesting = NestedDeviceSupport::resolve(device, self.management.as_ref()).await?;
        router
            .route_system_command(command, &nesting, assignment.as_ref())
            .await
    }
}
