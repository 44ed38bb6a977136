//! Outbound command routing.
//!
//! A router maps a target device to the [`CommandDestination`] that can
//! reach it. Both default routers share a [`DestinationIndex`] that the
//! owning facade fills via `initialize` before any routing happens.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{DeviceAssignment, DeviceCommandExecution, SystemCommand};
use fleetwire_core::{Error, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::destination::CommandDestination;
use crate::nesting::NestingContext;

/// Routes commands to destinations.
#[async_trait]
pub trait OutboundCommandRouter: LifecycleComponent {
    /// Replace the set of destinations this router can choose from.
    fn initialize(&self, destinations: Vec<Arc<dyn CommandDestination>>) -> Result<()>;

    async fn route_command(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<()>;

    async fn route_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<()>;
}

/// Id-to-destination index, rebuilt wholesale on each `replace_all`.
#[derive(Default)]
pub struct DestinationIndex {
    destinations: RwLock<HashMap<String, Arc<dyn CommandDestination>>>,
}

impl DestinationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new destination set. Later duplicates of an id win.
    pub fn replace_all(&self, destinations: Vec<Arc<dyn CommandDestination>>) {
        let index: HashMap<String, Arc<dyn CommandDestination>> = destinations
            .into_iter()
            .map(|d| (d.destination_id().to_string(), d))
            .collect();
        *self.destinations.write() = index;
    }

    /// Destination registered under `destination_id`, if any.
    pub fn get(&self, destination_id: &str) -> Option<Arc<dyn CommandDestination>> {
        self.destinations.read().get(destination_id).cloned()
    }

    /// Number of indexed destinations.
    pub fn len(&self) -> usize {
        self.destinations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sole destination, when exactly one is indexed.
    pub fn single(&self) -> Option<Arc<dyn CommandDestination>> {
        let destinations = self.destinations.read();
        if destinations.len() == 1 {
            destinations.values().next().cloned()
        } else {
            None
        }
    }
}

/// Routes every command to the only configured destination.
pub struct SingleChoiceCommandRouter {
    index: DestinationIndex,
    destination: RwLock<Option<Arc<dyn CommandDestination>>>,
    state: LifecycleState,
}

impl SingleChoiceCommandRouter {
    pub fn new() -> Self {
        Self {
            index: DestinationIndex::new(),
            destination: RwLock::new(None),
            state: LifecycleState::new(),
        }
    }

    fn destination(&self) -> Result<Arc<dyn CommandDestination>> {
        self.destination
            .read()
            .clone()
            .ok_or_else(|| Error::Configuration("Single choice command router is not started".to_string()))
    }
}

impl Default for SingleChoiceCommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleComponent for SingleChoiceCommandRouter {
    fn component_name(&self) -> String {
        "Single choice command router".to_string()
    }

    async fn start(&self) -> Result<()> {
        let Some(destination) = self.index.single() else {
            self.state.set(LifecycleStatus::Error);
            return Err(Error::Configuration(format!(
                "Expected exactly one destination for command routing but found {}.",
                self.index.len()
            )));
        };
        info!(destination_id = %destination.destination_id(), "Routing all commands to single destination");
        *self.destination.write() = Some(destination);
        self.state.set(LifecycleStatus::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.destination.write() = None;
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl OutboundCommandRouter for SingleChoiceCommandRouter {
    fn initialize(&self, destinations: Vec<Arc<dyn CommandDestination>>) -> Result<()> {
        self.index.replace_all(destinations);
        Ok(())
    }

    async fn route_command(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<()> {
        self.destination()?
            .deliver_command(execution, nesting, assignment)
            .await
    }

    async fn route_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<()> {
        self.destination()?
            .deliver_system_command(command, nesting, assignment)
            .await
    }
}

/// Routes by the gateway device's specification token.
pub struct SpecificationMappingCommandRouter {
    index: DestinationIndex,
    /// Specification token to destination id
    mappings: HashMap<String, String>,
    default_destination: Option<String>,
    state: LifecycleState,
}

impl SpecificationMappingCommandRouter {
    pub fn new(mappings: HashMap<String, String>) -> Self {
        Self {
            index: DestinationIndex::new(),
            mappings,
            default_destination: None,
            state: LifecycleState::new(),
        }
    }

    /// Destination used when a specification token has no mapping.
    pub fn with_default_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.default_destination = Some(destination_id.into());
        self
    }

    /// Route commands for `specification_token` to `destination_id`.
    pub fn with_mapping(mut self, specification_token: impl Into<String>, destination_id: impl Into<String>) -> Self {
        self.mappings
            .insert(specification_token.into(), destination_id.into());
        self
    }

    /// Pick the destination for a nesting context. Nested devices are
    /// reached through their gateway, so the gateway's specification wins.
    fn destination_for(&self, nesting: &NestingContext) -> Result<Arc<dyn CommandDestination>> {
        let specification = &nesting.gateway.specification_token;
        let destination_id = self
            .mappings
            .get(specification)
            .or(self.default_destination.as_ref())
            .ok_or_else(|| Error::NoDestinationMapping(specification.clone()))?;

        debug!(specification = %specification, destination_id = %destination_id, "Resolved command destination");
        self.index
            .get(destination_id)
            .ok_or_else(|| Error::DestinationNotFound(destination_id.clone()))
    }
}

#[async_trait]
impl LifecycleComponent for SpecificationMappingCommandRouter {
    fn component_name(&self) -> String {
        "Specification mapping command router".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl OutboundCommandRouter for SpecificationMappingCommandRouter {
    fn initialize(&self, destinations: Vec<Arc<dyn CommandDestination>>) -> Result<()> {
        self.index.replace_all(destinations);
        Ok(())
    }

    async fn route_command(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<()> {
        self.destination_for(nesting)?
            .deliver_command(execution, nesting, assignment)
            .await
    }

    async fn route_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<()> {
        self.destination_for(nesting)?
            .deliver_system_command(command, nesting, assignment)
            .await
    }
}
