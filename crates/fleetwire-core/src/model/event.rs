//! Inbound event requests and stored device events.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batch::BatchOperation;
use super::command::DeviceCommandInvocation;

/// Request to register (or re-register) a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub hardware_id: String,
    pub specification_token: String,
    /// Site to place a new device in; auto-assigned when absent
    #[serde(default)]
    pub site_token: Option<String>,
    /// Metadata copied onto newly created devices
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Request to record a set of named measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementsCreateRequest {
    pub measurements: BTreeMap<String, f64>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Update the assignment's recorded state
    #[serde(default)]
    pub update_state: bool,
}

/// Request to record a device location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationCreateRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub update_state: bool,
}

/// Severity of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

/// Where an alert originated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    #[default]
    Device,
    System,
}

/// Request to record an alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertCreateRequest {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    #[serde(default)]
    pub level: AlertLevel,
    #[serde(default)]
    pub source: AlertSource,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub update_state: bool,
}

/// Request to record a device's response to a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponseCreateRequest {
    /// Id of the invocation being responded to
    pub originating_event_id: String,
    /// Id of an event sent as the response, if any
    #[serde(default)]
    pub response_event_id: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub update_state: bool,
}

/// The five inbound request kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request", rename_all = "snake_case")]
pub enum DeviceEventRequest {
    Registration(RegistrationRequest),
    Measurements(MeasurementsCreateRequest),
    Location(LocationCreateRequest),
    Alert(AlertCreateRequest),
    CommandResponse(CommandResponseCreateRequest),
}

impl DeviceEventRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEventRequest::Registration(_) => "registration",
            DeviceEventRequest::Measurements(_) => "measurements",
            DeviceEventRequest::Location(_) => "location",
            DeviceEventRequest::Alert(_) => "alert",
            DeviceEventRequest::CommandResponse(_) => "command_response",
        }
    }

    /// Set whether storing this event updates assignment state.
    /// Registration requests carry no state and ignore the flag.
    pub fn set_update_state(&mut self, update_state: bool) {
        match self {
            DeviceEventRequest::Registration(_) => {}
            DeviceEventRequest::Measurements(r) => r.update_state = update_state,
            DeviceEventRequest::Location(r) => r.update_state = update_state,
            DeviceEventRequest::Alert(r) => r.update_state = update_state,
            DeviceEventRequest::CommandResponse(r) => r.update_state = update_state,
        }
    }

    /// Whether storing this request should also refresh the assignment state.
    pub fn update_state(&self) -> bool {
        match self {
            DeviceEventRequest::Registration(_) => false,
            DeviceEventRequest::Measurements(r) => r.update_state,
            DeviceEventRequest::Location(r) => r.update_state,
            DeviceEventRequest::Alert(r) => r.update_state,
            DeviceEventRequest::CommandResponse(r) => r.update_state,
        }
    }
}

/// An event request decoded from a transport payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedDeviceEventRequest {
    /// Hardware id of the reporting device
    pub hardware_id: String,
    /// Id of the invocation this event answers, if any
    #[serde(default)]
    pub originator: Option<String>,
    pub request: DeviceEventRequest,
}

impl DecodedDeviceEventRequest {
    pub fn new(hardware_id: impl Into<String>, request: DeviceEventRequest) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            originator: None,
            request,
        }
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = Some(originator.into());
        self
    }
}

/// Fields common to every stored device event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEventInfo {
    /// Unique event id
    pub id: String,
    pub assignment_token: String,
    pub site_token: String,
    pub device_hardware_id: String,
    pub event_date: DateTime<Utc>,
    pub received_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stored measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMeasurements {
    #[serde(flatten)]
    pub info: DeviceEventInfo,
    pub measurements: BTreeMap<String, f64>,
}

/// Stored location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLocation {
    #[serde(flatten)]
    pub info: DeviceEventInfo,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
}

/// Stored alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAlert {
    #[serde(flatten)]
    pub info: DeviceEventInfo,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub level: AlertLevel,
    pub source: AlertSource,
}

/// Stored command response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommandResponse {
    #[serde(flatten)]
    pub info: DeviceEventInfo,
    pub originating_event_id: String,
    #[serde(default)]
    pub response_event_id: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

/// The six stored-event kinds handed to outbound processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum OutboundEvent {
    Measurements(DeviceMeasurements),
    Location(DeviceLocation),
    Alert(DeviceAlert),
    CommandInvocation(DeviceCommandInvocation),
    CommandResponse(DeviceCommandResponse),
    BatchOperation(BatchOperation),
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Measurements(_) => "measurements",
            OutboundEvent::Location(_) => "location",
            OutboundEvent::Alert(_) => "alert",
            OutboundEvent::CommandInvocation(_) => "command_invocation",
            OutboundEvent::CommandResponse(_) => "command_response",
            OutboundEvent::BatchOperation(_) => "batch_operation",
        }
    }
}
