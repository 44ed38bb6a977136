//! Inbound processor that persists device events.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{
    AlertCreateRequest, CommandResponseCreateRequest, DeviceAssignment, LocationCreateRequest,
    MeasurementsCreateRequest, RegistrationRequest,
};
use fleetwire_core::{DeviceManagement, Error, ExecutionContext, LifecycleComponent, Result};
use tracing::debug;

use crate::processor::InboundEventProcessor;
use crate::registration::RegistrationManager;

/// Stores inbound events through device management.
///
/// Registration requests are handed to the registration manager. Events
/// that carry an originator also record a command response linking the
/// originating invocation to the stored event.
pub struct DefaultEventStorageProcessor {
    management: Arc<dyn DeviceManagement>,
    registration: Arc<dyn RegistrationManager>,
}

impl DefaultEventStorageProcessor {
    pub fn new(management: Arc<dyn DeviceManagement>, registration: Arc<dyn RegistrationManager>) -> Self {
        Self {
            management,
            registration,
        }
    }

    async fn current_assignment(&self, hardware_id: &str) -> Result<DeviceAssignment> {
        let device = self
            .management
            .get_device_by_hardware_id(hardware_id)
            .await?
            .ok_or_else(|| Error::InvalidHardwareId(hardware_id.to_string()))?;
        self.management
            .get_current_device_assignment(&device)
            .await?
            .ok_or_else(|| Error::DeviceNotAssigned(hardware_id.to_string()))
    }

    async fn link_response(
        &self,
        ctx: &ExecutionContext,
        originator: Option<&str>,
        event_id: &str,
        assignment: &DeviceAssignment,
    ) -> Result<()> {
        let Some(originator) = originator.filter(|o| !o.is_empty()) else {
            return Ok(());
        };
        let response = CommandResponseCreateRequest {
            originating_event_id: originator.to_string(),
            response_event_id: Some(event_id.to_string()),
            ..Default::default()
        };
        self.management
            .add_device_command_response(ctx, &assignment.token, &response)
            .await?;
        debug!(originator, event_id, "Linked event to originating invocation");
        Ok(())
    }
}

#[async_trait]
impl LifecycleComponent for DefaultEventStorageProcessor {
    fn component_name(&self) -> String {
        "Default event storage processor".to_string()
    }
}

#[async_trait]
impl InboundEventProcessor for DefaultEventStorageProcessor {
    async fn on_registration_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        request: &RegistrationRequest,
    ) -> Result<()> {
        self.registration
            .handle_device_registration(ctx, hardware_id, request)
            .await
    }

    async fn on_command_response_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        request: &CommandResponseCreateRequest,
    ) -> Result<()> {
        let assignment = self.current_assignment(hardware_id).await?;
        self.management
            .add_device_command_response(ctx, &assignment.token, request)
            .await?;
        Ok(())
    }

    async fn on_measurements_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &MeasurementsCreateRequest,
    ) -> Result<()> {
        let assignment = self.current_assignment(hardware_id).await?;
        let stored = self
            .management
            .add_device_measurements(ctx, &assignment.token, request)
            .await?;
        self.link_response(ctx, originator, &stored.info.id, &assignment)
            .await
    }

    async fn on_location_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &LocationCreateRequest,
    ) -> Result<()> {
        let assignment = self.current_assignment(hardware_id).await?;
        let stored = self
            .management
            .add_device_location(ctx, &assignment.token, request)
            .await?;
        self.link_response(ctx, originator, &stored.info.id, &assignment)
            .await
    }

    async fn on_alert_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &AlertCreateRequest,
    ) -> Result<()> {
        let assignment = self.current_assignment(hardware_id).await?;
        let stored = self
            .management
            .add_device_alert(ctx, &assignment.token, request)
            .await?;
        self.link_response(ctx, originator, &stored.info.id, &assignment)
            .await
    }
}
