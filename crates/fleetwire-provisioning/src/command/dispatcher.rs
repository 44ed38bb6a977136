//! Command side of provisioning: strategy, router and destinations.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{Device, DeviceCommandInvocation, SystemCommand};
use fleetwire_core::{Error, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use tracing::{info, warn};

use super::strategy::CommandProcessingStrategy;
use crate::destination::CommandDestination;
use crate::router::OutboundCommandRouter;

/// Owns the command processing strategy, router and destinations.
///
/// Shared by the registration manager and the provisioning event processor
/// so both can send commands without holding the whole facade.
pub struct CommandDispatcher {
    strategy: Arc<dyn CommandProcessingStrategy>,
    router: Arc<dyn OutboundCommandRouter>,
    destinations: Vec<Arc<dyn CommandDestination>>,
    state: LifecycleState,
}

impl CommandDispatcher {
    /// The router is initialized with `destinations` when the dispatcher starts.
    pub fn new(
        strategy: Arc<dyn CommandProcessingStrategy>,
        router: Arc<dyn OutboundCommandRouter>,
        destinations: Vec<Arc<dyn CommandDestination>>,
    ) -> Self {
        Self {
            strategy,
            router,
            destinations,
            state: LifecycleState::new(),
        }
    }

    pub fn destinations(&self) -> &[Arc<dyn CommandDestination>] {
        &self.destinations
    }

    pub fn router(&self) -> &Arc<dyn OutboundCommandRouter> {
        &self.router
    }

    pub fn strategy(&self) -> &Arc<dyn CommandProcessingStrategy> {
        &self.strategy
    }

    /// Builds, resolves and routes a stored command invocation.
    pub async fn deliver_command(&self, invocation: &DeviceCommandInvocation) -> Result<()> {
        self.strategy
            .deliver_command(self.router.as_ref(), invocation)
            .await
    }

    /// Looks up the device by hardware id, then delivers `command` to it.
    pub async fn deliver_system_command(&self, hardware_id: &str, command: &SystemCommand) -> Result<()> {
        self.strategy
            .deliver_system_command(self.router.as_ref(), hardware_id, command)
            .await
    }

    pub async fn deliver_system_command_to_device(&self, device: &Device, command: &SystemCommand) -> Result<()> {
        self.strategy
            .deliver_system_command_to_device(self.router.as_ref(), device, command)
            .await
    }

    async fn start_children(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(Error::Configuration("No command destinations configured".to_string()));
        }
        self.strategy.start().await?;
        for destination in &self.destinations {
            destination.start().await?;
        }
        self.router.initialize(self.destinations.clone())?;
        self.router.start().await
    }
}

#[async_trait]
impl LifecycleComponent for CommandDispatcher {
    fn component_name(&self) -> String {
        "Command dispatcher".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        match self.start_children().await {
            Ok(()) => {
                self.state.set(LifecycleStatus::Started);
                info!(destinations = self.destinations.len(), "Command dispatcher started");
                Ok(())
            }
            Err(e) => {
                self.state.set(LifecycleStatus::Error);
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopping);
        if let Err(e) = self.router.stop().await {
            warn!(error = %e, "Failed to stop command router");
        }
        if let Err(e) = self.strategy.stop().await {
            warn!(error = %e, "Failed to stop command processing strategy");
        }
        for destination in &self.destinations {
            if let Err(e) = destination.stop().await {
                warn!(destination_id = %destination.destination_id(), error = %e, "Failed to stop destination");
            }
        }
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}
