//! Device event decoders.
//!
//! A decoder turns one transport payload into zero or more decoded
//! requests. Decoders are stateless and shared across receivers.

use std::collections::HashMap;

use fleetwire_core::model::{
    AlertCreateRequest, CommandResponseCreateRequest, DecodedDeviceEventRequest,
    DeviceEventRequest, LocationCreateRequest, MeasurementsCreateRequest, RegistrationRequest,
};
use fleetwire_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Transport metadata accompanying a payload (topic, remote address, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    values: HashMap<String, String>,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Decodes payloads of type `T`.
pub trait DeviceEventDecoder<T>: Send + Sync {
    fn decode(&self, payload: &T, context: &EventContext) -> Result<Vec<DecodedDeviceEventRequest>>;
}

/// JSON document carrying several events for one device.
///
/// Top-level keys are camelCase; entries use the request field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventBatch {
    pub hardware_id: String,
    #[serde(default)]
    pub originator: Option<String>,
    #[serde(default)]
    pub registration: Option<RegistrationRequest>,
    #[serde(default)]
    pub measurements: Vec<MeasurementsCreateRequest>,
    #[serde(default)]
    pub locations: Vec<LocationCreateRequest>,
    #[serde(default)]
    pub alerts: Vec<AlertCreateRequest>,
    #[serde(default)]
    pub command_responses: Vec<CommandResponseCreateRequest>,
}

impl DeviceEventBatch {
    /// One decoded request per entry: registration first, then responses,
    /// locations, measurements and alerts.
    pub fn into_requests(self) -> Vec<DecodedDeviceEventRequest> {
        let registration = self.registration.map(DeviceEventRequest::Registration);
        let requests = registration
            .into_iter()
            .chain(self.command_responses.into_iter().map(DeviceEventRequest::CommandResponse))
            .chain(self.locations.into_iter().map(DeviceEventRequest::Location))
            .chain(self.measurements.into_iter().map(DeviceEventRequest::Measurements))
            .chain(self.alerts.into_iter().map(DeviceEventRequest::Alert));

        let hardware_id = self.hardware_id;
        let originator = self.originator;
        requests
            .map(|request| DecodedDeviceEventRequest {
                hardware_id: hardware_id.clone(),
                originator: originator.clone(),
                request,
            })
            .collect()
    }
}

/// Decodes a [`DeviceEventBatch`] from JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBatchEventDecoder;

impl DeviceEventDecoder<Vec<u8>> for JsonBatchEventDecoder {
    fn decode(&self, payload: &Vec<u8>, _context: &EventContext) -> Result<Vec<DecodedDeviceEventRequest>> {
        let batch: DeviceEventBatch = serde_json::from_slice(payload)
            .map_err(|e| Error::Decode(format!("Invalid JSON event batch: {}", e)))?;
        Ok(batch.into_requests())
    }
}

/// Logs raw payloads for debugging; produces no requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadLoggerEventDecoder;

impl DeviceEventDecoder<Vec<u8>> for PayloadLoggerEventDecoder {
    fn decode(&self, payload: &Vec<u8>, _context: &EventContext) -> Result<Vec<DecodedDeviceEventRequest>> {
        info!(
            text = %String::from_utf8_lossy(payload),
            hex = %hex::encode(payload),
            "Received event payload"
        );
        Ok(Vec::new())
    }
}

/// Logs string payloads; produces no requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoStringDecoder;

impl DeviceEventDecoder<String> for EchoStringDecoder {
    fn decode(&self, payload: &String, _context: &EventContext) -> Result<Vec<DecodedDeviceEventRequest>> {
        info!(payload = %payload, "Received string payload");
        Ok(Vec::new())
    }
}
