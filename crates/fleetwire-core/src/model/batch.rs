//! Batch operations applied to many devices.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation parameter naming the command to invoke.
pub const PARAM_COMMAND_TOKEN: &str = "commandToken";

/// Element metadata key holding the created invocation id.
pub const META_INVOCATION_EVENT_ID: &str = "invocationEventId";

/// Invocation metadata key holding the originating batch operation token.
pub const META_BATCH_OPERATION_ID: &str = "batchOperationId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperationType {
    InvokeCommand,
    UpdateFirmware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperationStatus {
    Unprocessed,
    Processing,
    FinishedSuccessfully,
    FinishedWithErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementProcessingStatus {
    Unprocessed,
    Processing,
    Failed,
    Succeeded,
}

/// An operation applied to a list of devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub token: String,
    pub operation_type: BatchOperationType,
    /// Operation parameters (e.g. the command token)
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// For command invocations, the command parameter values
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub hardware_ids: Vec<String>,
    pub processing_status: BatchOperationStatus,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub processing_started_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_ended_date: Option<DateTime<Utc>>,
}

/// Per-device element of a batch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchElement {
    pub batch_operation_token: String,
    pub hardware_id: String,
    pub index: usize,
    pub processing_status: ElementProcessingStatus,
    #[serde(default)]
    pub processed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
