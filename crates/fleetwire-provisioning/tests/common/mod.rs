//! Shared fixtures for provisioning integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwire_core::model::*;
use fleetwire_core::{
    DeviceAssignmentCreateRequest, DeviceCommandCreateRequest, DeviceCreateRequest,
    DeviceManagement, DeviceSpecificationCreateRequest, ExecutionContext,
    InMemoryDeviceManagement, LifecycleComponent, LifecycleState, LifecycleStatus, Result,
    SiteCreateRequest,
};
use fleetwire_provisioning::{
    ChannelDeliveryProvider, CommandDestination, DefaultCommandDestination, DeliveredCommand,
    InboundEventProcessor, JsonCommandExecutionEncoder, NullParameters, NullParametersExtractor,
    OutboundEventProcessor,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;

pub type Delivery = DeliveredCommand<Vec<u8>, NullParameters>;

pub fn ctx() -> ExecutionContext {
    ExecutionContext::system()
}

// ============================================================================
// Device management fixture
// ============================================================================

/// In-memory management seeded with one site and one specification.
pub struct Fixture {
    pub management: Arc<InMemoryDeviceManagement>,
    pub site: Site,
    pub specification: DeviceSpecification,
}

impl Fixture {
    pub async fn new() -> Self {
        let management = Arc::new(InMemoryDeviceManagement::new());
        let site = management
            .create_site(
                &ctx(),
                SiteCreateRequest {
                    token: Some("site-1".into()),
                    name: "Main".into(),
                    description: None,
                },
            )
            .await
            .unwrap();
        let specification = management
            .create_device_specification(
                &ctx(),
                DeviceSpecificationCreateRequest {
                    token: Some("spec-1".into()),
                    name: "Sensor".into(),
                },
            )
            .await
            .unwrap();
        Self {
            management,
            site,
            specification,
        }
    }

    pub fn dyn_management(&self) -> Arc<dyn DeviceManagement> {
        self.management.clone()
    }

    pub async fn create_specification(&self, token: &str) -> DeviceSpecification {
        self.management
            .create_device_specification(
                &ctx(),
                DeviceSpecificationCreateRequest {
                    token: Some(token.into()),
                    name: token.into(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn create_device(&self, hardware_id: &str) -> Device {
        self.create_device_with(DeviceCreateRequest {
            hardware_id: hardware_id.into(),
            site_token: self.site.token.clone(),
            specification_token: self.specification.token.clone(),
            ..Default::default()
        })
        .await
    }

    pub async fn create_device_with(&self, request: DeviceCreateRequest) -> Device {
        self.management.create_device(&ctx(), request).await.unwrap()
    }

    pub async fn assign(&self, hardware_id: &str) -> DeviceAssignment {
        self.management
            .create_device_assignment(
                &ctx(),
                DeviceAssignmentCreateRequest {
                    device_hardware_id: hardware_id.into(),
                    assignment_type: DeviceAssignmentType::Unassociated,
                    asset_reference: None,
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap()
    }

    /// Command `set_level(level: int32 required, label: string optional)`.
    pub async fn create_command(&self) -> DeviceCommand {
        self.management
            .create_device_command(
                &ctx(),
                &self.specification.token,
                DeviceCommandCreateRequest {
                    token: Some("cmd-set-level".into()),
                    name: "set_level".into(),
                    parameters: vec![
                        CommandParameter::new("level", ParameterType::Int32, true),
                        CommandParameter::new("label", ParameterType::String, false),
                    ],
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }
}

// ============================================================================
// Destinations
// ============================================================================

/// JSON destination that captures deliveries on a channel.
pub fn channel_destination(id: &str) -> (Arc<dyn CommandDestination>, UnboundedReceiver<Delivery>) {
    let (provider, receiver) = ChannelDeliveryProvider::<Vec<u8>, NullParameters>::new(id);
    let destination = DefaultCommandDestination::<Vec<u8>, NullParameters>::new(id)
        .with_encoder(Arc::new(JsonCommandExecutionEncoder::new()))
        .with_extractor(Arc::new(NullParametersExtractor))
        .with_provider(Arc::new(provider));
    (Arc::new(destination), receiver)
}

/// Wait for the next delivery, failing the test after two seconds.
pub async fn next_delivery(receiver: &mut UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Recording processors
// ============================================================================

/// What a recording processor does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Record,
    Fail,
    Panic,
}

/// Inbound processor that records `(kind, hardware_id)` pairs.
pub struct RecordingInboundProcessor {
    name: String,
    behavior: Behavior,
    calls: Mutex<Vec<(String, String)>>,
    entered: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    state: LifecycleState,
}

impl RecordingInboundProcessor {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: None,
            state: LifecycleState::new(),
        }
    }

    /// Each call waits for a permit from `gate` before completing.
    pub fn gated(name: &str, gate: Arc<Semaphore>) -> Self {
        let mut processor = Self::new(name, Behavior::Record);
        processor.gate = Some(gate);
        processor
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls that have started, including ones still waiting on the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    async fn handle(&self, kind: &str, hardware_id: &str) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        match self.behavior {
            Behavior::Record => {
                self.calls.lock().push((kind.to_string(), hardware_id.to_string()));
                Ok(())
            }
            Behavior::Fail => Err(fleetwire_core::Error::Delivery(format!("{} failed", self.name))),
            Behavior::Panic => panic!("{} panicked", self.name),
        }
    }
}

#[async_trait]
impl LifecycleComponent for RecordingInboundProcessor {
    fn component_name(&self) -> String {
        self.name.clone()
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
impl InboundEventProcessor for RecordingInboundProcessor {
    async fn on_registration_request(
        &self,
        _ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        _request: &RegistrationRequest,
    ) -> Result<()> {
        self.handle("registration", hardware_id).await
    }

    async fn on_command_response_request(
        &self,
        _ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        _request: &CommandResponseCreateRequest,
    ) -> Result<()> {
        self.handle("command_response", hardware_id).await
    }

    async fn on_measurements_request(
        &self,
        _ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        _request: &MeasurementsCreateRequest,
    ) -> Result<()> {
        self.handle("measurements", hardware_id).await
    }

    async fn on_location_request(
        &self,
        _ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        _request: &LocationCreateRequest,
    ) -> Result<()> {
        self.handle("location", hardware_id).await
    }

    async fn on_alert_request(
        &self,
        _ctx: &ExecutionContext,
        hardware_id: &str,
        _originator: Option<&str>,
        _request: &AlertCreateRequest,
    ) -> Result<()> {
        self.handle("alert", hardware_id).await
    }
}

/// Outbound processor that records event kinds.
pub struct RecordingOutboundProcessor {
    name: String,
    behavior: Behavior,
    kinds: Mutex<Vec<String>>,
    entered: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    state: LifecycleState,
}

impl RecordingOutboundProcessor {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            kinds: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: None,
            state: LifecycleState::new(),
        }
    }

    /// Each call waits for a permit from `gate` before completing.
    pub fn gated(name: &str, gate: Arc<Semaphore>) -> Self {
        let mut processor = Self::new(name, Behavior::Record);
        processor.gate = Some(gate);
        processor
    }

    pub fn kinds(&self) -> Vec<String> {
        self.kinds.lock().clone()
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    async fn handle(&self, kind: &str) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        match self.behavior {
            Behavior::Record => {
                self.kinds.lock().push(kind.to_string());
                Ok(())
            }
            Behavior::Fail => Err(fleetwire_core::Error::Delivery(format!("{} failed", self.name))),
            Behavior::Panic => panic!("{} panicked", self.name),
        }
    }
}

#[async_trait]
impl LifecycleComponent for RecordingOutboundProcessor {
    fn component_name(&self) -> String {
        self.name.clone()
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
impl OutboundEventProcessor for RecordingOutboundProcessor {
    async fn on_measurements(&self, _ctx: &ExecutionContext, _event: &DeviceMeasurements) -> Result<()> {
        self.handle("measurements").await
    }

    async fn on_alert(&self, _ctx: &ExecutionContext, _event: &DeviceAlert) -> Result<()> {
        self.handle("alert").await
    }

    async fn on_command_invocation(
        &self,
        _ctx: &ExecutionContext,
        _invocation: &DeviceCommandInvocation,
    ) -> Result<()> {
        self.handle("command_invocation").await
    }
}

// ============================================================================
// Request builders
// ============================================================================

pub fn measurements(hardware_id: &str, name: &str, value: f64) -> DecodedDeviceEventRequest {
    DecodedDeviceEventRequest::new(
        hardware_id,
        DeviceEventRequest::Measurements(MeasurementsCreateRequest {
            measurements: [(name.to_string(), value)].into_iter().collect(),
            ..Default::default()
        }),
    )
}

pub fn alert(hardware_id: &str) -> DecodedDeviceEventRequest {
    DecodedDeviceEventRequest::new(
        hardware_id,
        DeviceEventRequest::Alert(AlertCreateRequest {
            alert_type: "overheat".into(),
            message: "Temperature too high".into(),
            ..Default::default()
        }),
    )
}

pub fn location(hardware_id: &str) -> DecodedDeviceEventRequest {
    DecodedDeviceEventRequest::new(
        hardware_id,
        DeviceEventRequest::Location(LocationCreateRequest {
            latitude: 33.75,
            longitude: -84.39,
            ..Default::default()
        }),
    )
}

/// A stored measurements event as outbound processors see it.
pub fn stored_measurements(id: &str) -> OutboundEvent {
    OutboundEvent::Measurements(DeviceMeasurements {
        info: DeviceEventInfo {
            id: id.into(),
            assignment_token: "asg-1".into(),
            site_token: "site-1".into(),
            device_hardware_id: "dev-1".into(),
            event_date: chrono::Utc::now(),
            received_date: chrono::Utc::now(),
            metadata: Default::default(),
        },
        measurements: [("temp".to_string(), 21.5)].into_iter().collect(),
    })
}

pub fn registration(hardware_id: &str, specification_token: &str, site_token: Option<&str>) -> RegistrationRequest {
    RegistrationRequest {
        hardware_id: hardware_id.into(),
        specification_token: specification_token.into(),
        site_token: site_token.map(str::to_string),
        metadata: Default::default(),
    }
}
