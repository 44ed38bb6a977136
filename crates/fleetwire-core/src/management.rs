//! Device management API consumed by the pipeline.
//!
//! Storage of sites, devices, assignments, commands and events lives behind
//! [`DeviceManagement`]. The pipeline never caches entities itself; every
//! read goes through this trait. Writes carry the [`ExecutionContext`] of
//! the caller.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::model::{
    AlertCreateRequest, BatchElement, BatchOperation, BatchOperationStatus, BatchOperationType,
    CommandInitiator, CommandParameter, CommandResponseCreateRequest, CommandStatus,
    CommandTarget, Device, DeviceAlert, DeviceAssignment, DeviceAssignmentType, DeviceCommand,
    DeviceCommandInvocation, DeviceCommandResponse, DeviceElementMapping, DeviceLocation,
    DeviceMeasurements, DeviceSpecification, ElementProcessingStatus, LocationCreateRequest,
    MeasurementsCreateRequest, Site,
};

/// Request to create a site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteCreateRequest {
    /// Generated when absent
    #[serde(default)]
    pub token: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request to create a device specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSpecificationCreateRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub name: String,
}

/// Request to create a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCreateRequest {
    pub hardware_id: String,
    pub site_token: String,
    pub specification_token: String,
    #[serde(default)]
    pub parent_hardware_id: Option<String>,
    #[serde(default)]
    pub element_mappings: Vec<DeviceElementMapping>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Request to assign a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAssignmentCreateRequest {
    pub device_hardware_id: String,
    pub assignment_type: DeviceAssignmentType,
    #[serde(default)]
    pub asset_reference: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Request to create a command on a specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCommandCreateRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
}

/// Request to invoke a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCommandInvocationCreateRequest {
    pub command_token: String,
    pub initiator: CommandInitiator,
    #[serde(default)]
    pub initiator_id: Option<String>,
    pub target: CommandTarget,
    pub target_id: String,
    #[serde(default)]
    pub parameter_values: HashMap<String, String>,
    #[serde(default)]
    pub status: Option<CommandStatus>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Request to create a batch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationCreateRequest {
    #[serde(default)]
    pub token: Option<String>,
    pub operation_type: BatchOperationType,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub hardware_ids: Vec<String>,
}

/// Lookup and storage of device-management entities.
#[async_trait]
pub trait DeviceManagement: Send + Sync {
    async fn create_site(&self, ctx: &ExecutionContext, request: SiteCreateRequest) -> Result<Site>;

    async fn get_site_by_token(&self, token: &str) -> Result<Option<Site>>;

    /// All sites, oldest first.
    async fn list_sites(&self) -> Result<Vec<Site>>;

    async fn create_device_specification(
        &self,
        ctx: &ExecutionContext,
        request: DeviceSpecificationCreateRequest,
    ) -> Result<DeviceSpecification>;

    async fn get_device_specification_by_token(
        &self,
        token: &str,
    ) -> Result<Option<DeviceSpecification>>;

    async fn create_device(&self, ctx: &ExecutionContext, request: DeviceCreateRequest)
        -> Result<Device>;

    async fn get_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>>;

    /// Fails with `DeviceAlreadyAssigned` if the device has an active assignment.
    async fn create_device_assignment(
        &self,
        ctx: &ExecutionContext,
        request: DeviceAssignmentCreateRequest,
    ) -> Result<DeviceAssignment>;

    async fn get_device_assignment_by_token(&self, token: &str)
        -> Result<Option<DeviceAssignment>>;

    async fn get_current_device_assignment(&self, device: &Device)
        -> Result<Option<DeviceAssignment>>;

    async fn get_device_for_assignment(&self, assignment: &DeviceAssignment)
        -> Result<Option<Device>>;

    async fn release_device_assignment(
        &self,
        ctx: &ExecutionContext,
        token: &str,
    ) -> Result<DeviceAssignment>;

    /// Fails with `DuplicateCommand` if name and namespace clash.
    async fn create_device_command(
        &self,
        ctx: &ExecutionContext,
        specification_token: &str,
        request: DeviceCommandCreateRequest,
    ) -> Result<DeviceCommand>;

    async fn get_device_command_by_token(&self, token: &str) -> Result<Option<DeviceCommand>>;

    async fn add_device_measurements(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &MeasurementsCreateRequest,
    ) -> Result<DeviceMeasurements>;

    async fn add_device_location(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &LocationCreateRequest,
    ) -> Result<DeviceLocation>;

    async fn add_device_alert(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &AlertCreateRequest,
    ) -> Result<DeviceAlert>;

    async fn add_device_command_response(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &CommandResponseCreateRequest,
    ) -> Result<DeviceCommandResponse>;

    async fn add_device_command_invocation(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        command: &DeviceCommand,
        request: DeviceCommandInvocationCreateRequest,
    ) -> Result<DeviceCommandInvocation>;

    async fn create_batch_operation(
        &self,
        ctx: &ExecutionContext,
        request: BatchOperationCreateRequest,
    ) -> Result<BatchOperation>;

    async fn get_batch_operation(&self, token: &str) -> Result<Option<BatchOperation>>;

    async fn list_batch_elements(&self, token: &str) -> Result<Vec<BatchElement>>;

    async fn update_batch_operation(
        &self,
        token: &str,
        status: BatchOperationStatus,
    ) -> Result<BatchOperation>;

    async fn update_batch_element(
        &self,
        token: &str,
        index: usize,
        status: ElementProcessingStatus,
        metadata: HashMap<String, String>,
    ) -> Result<BatchElement>;
}
