//! Inbound and outbound event processor contracts.
//!
//! Every method has a no-op default so processors only implement the event
//! kinds they care about. Dispatch is an exhaustive match over the closed
//! request and event enums.

use async_trait::async_trait;
use fleetwire_core::model::{
    AlertCreateRequest, BatchOperation, CommandResponseCreateRequest, DecodedDeviceEventRequest,
    DeviceAlert, DeviceCommandInvocation, DeviceCommandResponse, DeviceEventRequest,
    DeviceLocation, DeviceMeasurements, LocationCreateRequest, MeasurementsCreateRequest,
    OutboundEvent, RegistrationRequest,
};
use fleetwire_core::{ExecutionContext, LifecycleComponent, Result};

/// Consumer of decoded inbound requests.
#[async_trait]
pub trait InboundEventProcessor: LifecycleComponent {
    async fn on_registration_request(
        &self,
        _ctx: &ExecutionContext,
        _hardware_id: &str,
        _originator: Option<&str>,
        _request: &RegistrationRequest,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_command_response_request(
        &self,
        _ctx: &ExecutionContext,
        _hardware_id: &str,
        _originator: Option<&str>,
        _request: &CommandResponseCreateRequest,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_measurements_request(
        &self,
        _ctx: &ExecutionContext,
        _hardware_id: &str,
        _originator: Option<&str>,
        _request: &MeasurementsCreateRequest,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_location_request(
        &self,
        _ctx: &ExecutionContext,
        _hardware_id: &str,
        _originator: Option<&str>,
        _request: &LocationCreateRequest,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_alert_request(
        &self,
        _ctx: &ExecutionContext,
        _hardware_id: &str,
        _originator: Option<&str>,
        _request: &AlertCreateRequest,
    ) -> Result<()> {
        Ok(())
    }

    /// Failures this processor caught and logged instead of returning.
    ///
    /// Queue strategies add this to their error count, so chains that
    /// isolate their processors still show up in the metrics.
    fn isolated_failures(&self) -> u64 {
        0
    }
}

/// Route a decoded request to the matching processor method.
pub async fn dispatch_inbound(
    processor: &dyn InboundEventProcessor,
    ctx: &ExecutionContext,
    decoded: &DecodedDeviceEventRequest,
) -> Result<()> {
    let hardware_id = decoded.hardware_id.as_str();
    let originator = decoded.originator.as_deref();
    match &decoded.request {
        DeviceEventRequest::Registration(r) => {
            processor
                .on_registration_request(ctx, hardware_id, originator, r)
                .await
        }
        DeviceEventRequest::CommandResponse(r) => {
            processor
                .on_command_response_request(ctx, hardware_id, originator, r)
                .await
        }
        DeviceEventRequest::Measurements(r) => {
            processor
                .on_measurements_request(ctx, hardware_id, originator, r)
                .await
        }
        DeviceEventRequest::Location(r) => {
            processor
                .on_location_request(ctx, hardware_id, originator, r)
                .await
        }
        DeviceEventRequest::Alert(r) => {
            processor
                .on_alert_request(ctx, hardware_id, originator, r)
                .await
        }
    }
}

/// Consumer of stored events.
#[async_trait]
pub trait OutboundEventProcessor: LifecycleComponent {
    async fn on_measurements(&self, _ctx: &ExecutionContext, _event: &DeviceMeasurements) -> Result<()> {
        Ok(())
    }

    async fn on_location(&self, _ctx: &ExecutionContext, _event: &DeviceLocation) -> Result<()> {
        Ok(())
    }

    async fn on_alert(&self, _ctx: &ExecutionContext, _event: &DeviceAlert) -> Result<()> {
        Ok(())
    }

    async fn on_command_invocation(
        &self,
        _ctx: &ExecutionContext,
        _invocation: &DeviceCommandInvocation,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_command_response(
        &self,
        _ctx: &ExecutionContext,
        _response: &DeviceCommandResponse,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_batch_operation(&self, _ctx: &ExecutionContext, _operation: &BatchOperation) -> Result<()> {
        Ok(())
    }

    /// Failures this processor caught and logged instead of returning.
    fn isolated_failures(&self) -> u64 {
        0
    }
}

/// Route a stored event to the matching processor method.
pub async fn dispatch_outbound(
    processor: &dyn OutboundEventProcessor,
    ctx: &ExecutionContext,
    event: &OutboundEvent,
) -> Result<()> {
    match event {
        OutboundEvent::Measurements(e) => processor.on_measurements(ctx, e).await,
        OutboundEvent::Location(e) => processor.on_location(ctx, e).await,
        OutboundEvent::Alert(e) => processor.on_alert(ctx, e).await,
        OutboundEvent::CommandInvocation(e) => processor.on_command_invocation(ctx, e).await,
        OutboundEvent::CommandResponse(e) => processor.on_command_response(ctx, e).await,
        OutboundEvent::BatchOperation(e) => processor.on_batch_operation(ctx, e).await,
    }
}
