//! In-memory [`DeviceManagement`] implementation.
//!
//! Entities live behind a single lock so invariants such as "one active
//! assignment per device" are checked and applied atomically. Events are
//! appended to per-assignment lists.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::management::{
    BatchOperationCreateRequest, DeviceAssignmentCreateRequest, DeviceCommandCreateRequest,
    DeviceCommandInvocationCreateRequest, DeviceCreateRequest, DeviceManagement,
    DeviceSpecificationCreateRequest, SiteCreateRequest,
};
use crate::model::{
    AlertCreateRequest, BatchElement, BatchOperation, BatchOperationStatus,
    CommandResponseCreateRequest, CommandStatus, Device, DeviceAlert, DeviceAssignment,
    DeviceAssignmentState, DeviceAssignmentStatus, DeviceCommand, DeviceCommandInvocation,
    DeviceCommandResponse, DeviceEventInfo, DeviceLocation, DeviceMeasurements,
    DeviceSpecification, ElementProcessingStatus, LocationCreateRequest,
    MeasurementsCreateRequest, Site,
};

#[derive(Default)]
struct Registry {
    sites: Vec<Site>,
    specifications: HashMap<String, DeviceSpecification>,
    devices: HashMap<String, Device>,
    assignments: HashMap<String, DeviceAssignment>,
    commands: HashMap<String, DeviceCommand>,
    batch_operations: HashMap<String, BatchOperation>,
    batch_elements: HashMap<String, Vec<BatchElement>>,
}

/// Volatile management store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryDeviceManagement {
    registry: RwLock<Registry>,
    measurements: DashMap<String, Vec<DeviceMeasurements>>,
    locations: DashMap<String, Vec<DeviceLocation>>,
    alerts: DashMap<String, Vec<DeviceAlert>>,
    responses: DashMap<String, Vec<DeviceCommandResponse>>,
    invocations: DashMap<String, DeviceCommandInvocation>,
}

fn new_token() -> String {
    Uuid::new_v4().to_string()
}

impl InMemoryDeviceManagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_count(&self) -> usize {
        self.registry.read().devices.len()
    }

    /// All assignments ever created for a device, including released ones.
    pub fn assignments_for_device(&self, hardware_id: &str) -> Vec<DeviceAssignment> {
        let registry = self.registry.read();
        let mut found: Vec<DeviceAssignment> = registry
            .assignments
            .values()
            .filter(|a| a.device_hardware_id == hardware_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.active_date);
        found
    }

    /// Stored measurements for an assignment, in insertion order.
    pub fn list_measurements(&self, assignment_token: &str) -> Vec<DeviceMeasurements> {
        self.measurements
            .get(assignment_token)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn list_locations(&self, assignment_token: &str) -> Vec<DeviceLocation> {
        self.locations
            .get(assignment_token)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn list_alerts(&self, assignment_token: &str) -> Vec<DeviceAlert> {
        self.alerts
            .get(assignment_token)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn list_command_responses(&self, assignment_token: &str) -> Vec<DeviceCommandResponse> {
        self.responses
            .get(assignment_token)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn get_command_invocation(&self, id: &str) -> Option<DeviceCommandInvocation> {
        self.invocations.get(id).map(|i| i.clone())
    }

    pub fn list_command_invocations(&self, assignment_token: &str) -> Vec<DeviceCommandInvocation> {
        let mut found: Vec<DeviceCommandInvocation> = self
            .invocations
            .iter()
            .filter(|i| i.assignment_token == assignment_token)
            .map(|i| i.clone())
            .collect();
        found.sort_by_key(|i| i.received_date);
        found
    }

    /// Build event info for an assignment, optionally touching its state.
    fn event_info(
        &self,
        assignment_token: &str,
        event_date: Option<DateTime<Utc>>,
        metadata: &HashMap<String, String>,
        update_state: bool,
        apply: impl FnOnce(&mut DeviceAssignmentState, &DeviceEventInfo),
    ) -> Result<DeviceEventInfo> {
        let mut registry = self.registry.write();
        let assignment = registry
            .assignments
            .get_mut(assignment_token)
            .ok_or_else(|| Error::AssignmentNotFound(assignment_token.to_string()))?;

        let now = Utc::now();
        let info = DeviceEventInfo {
            id: new_token(),
            assignment_token: assignment.token.clone(),
            site_token: assignment.site_token.clone(),
            device_hardware_id: assignment.device_hardware_id.clone(),
            event_date: event_date.unwrap_or(now),
            received_date: now,
            metadata: metadata.clone(),
        };

        if update_state {
            assignment.state.last_interaction_date = Some(now);
            apply(&mut assignment.state, &info);
        }
        Ok(info)
    }
}

#[async_trait]
impl DeviceManagement for InMemoryDeviceManagement {
    async fn create_site(&self, _ctx: &ExecutionContext, request: SiteCreateRequest) -> Result<Site> {
        let site = Site {
            token: request.token.unwrap_or_else(new_token),
            name: request.name,
            description: request.description,
            created_date: Utc::now(),
        };
        let mut registry = self.registry.write();
        if registry.sites.iter().any(|s| s.token == site.token) {
            return Err(Error::Configuration(format!(
                "Site token already in use: {}",
                site.token
            )));
        }
        registry.sites.push(site.clone());
        Ok(site)
    }

    async fn get_site_by_token(&self, token: &str) -> Result<Option<Site>> {
        Ok(self
            .registry
            .read()
            .sites
            .iter()
            .find(|s| s.token == token)
            .cloned())
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        Ok(self.registry.read().sites.clone())
    }

    async fn create_device_specification(
        &self,
        _ctx: &ExecutionContext,
        request: DeviceSpecificationCreateRequest,
    ) -> Result<DeviceSpecification> {
        let specification = DeviceSpecification {
            token: request.token.unwrap_or_else(new_token),
            name: request.name,
            created_date: Utc::now(),
        };
        self.registry
            .write()
            .specifications
            .insert(specification.token.clone(), specification.clone());
        Ok(specification)
    }

    async fn get_device_specification_by_token(
        &self,
        token: &str,
    ) -> Result<Option<DeviceSpecification>> {
        Ok(self.registry.read().specifications.get(token).cloned())
    }

    async fn create_device(
        &self,
        ctx: &ExecutionContext,
        request: DeviceCreateRequest,
    ) -> Result<Device> {
        let mut registry = self.registry.write();
        if registry.devices.contains_key(&request.hardware_id) {
            return Err(Error::Configuration(format!(
                "Hardware id already in use: {}",
                request.hardware_id
            )));
        }
        let device = Device {
            hardware_id: request.hardware_id,
            site_token: request.site_token,
            specification_token: request.specification_token,
            parent_hardware_id: request.parent_hardware_id,
            element_mappings: request.element_mappings,
            assignment_token: None,
            comments: request.comments,
            metadata: request.metadata,
            created_date: Utc::now(),
            created_by: Some(ctx.principal().to_string()),
        };
        registry
            .devices
            .insert(device.hardware_id.clone(), device.clone());
        debug!(hardware_id = %device.hardware_id, "Created device");
        Ok(device)
    }

    async fn get_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>> {
        Ok(self.registry.read().devices.get(hardware_id).cloned())
    }

    async fn create_device_assignment(
        &self,
        ctx: &ExecutionContext,
        request: DeviceAssignmentCreateRequest,
    ) -> Result<DeviceAssignment> {
        let mut registry = self.registry.write();
        let device = registry
            .devices
            .get(&request.device_hardware_id)
            .ok_or_else(|| Error::DeviceNotFound(request.device_hardware_id.clone()))?;
        if device.assignment_token.is_some() {
            return Err(Error::DeviceAlreadyAssigned(device.hardware_id.clone()));
        }

        let assignment = DeviceAssignment {
            token: new_token(),
            device_hardware_id: device.hardware_id.clone(),
            site_token: device.site_token.clone(),
            assignment_type: request.assignment_type,
            asset_reference: request.asset_reference,
            status: DeviceAssignmentStatus::Active,
            active_date: Utc::now(),
            released_date: None,
            state: DeviceAssignmentState::default(),
            metadata: request.metadata,
            created_by: Some(ctx.principal().to_string()),
        };

        if let Some(device) = registry.devices.get_mut(&request.device_hardware_id) {
            device.assignment_token = Some(assignment.token.clone());
        }
        registry
            .assignments
            .insert(assignment.token.clone(), assignment.clone());
        Ok(assignment)
    }

    async fn get_device_assignment_by_token(
        &self,
        token: &str,
    ) -> Result<Option<DeviceAssignment>> {
        Ok(self.registry.read().assignments.get(token).cloned())
    }

    async fn get_current_device_assignment(
        &self,
        device: &Device,
    ) -> Result<Option<DeviceAssignment>> {
        let registry = self.registry.read();
        let token = registry
            .devices
            .get(&device.hardware_id)
            .and_then(|d| d.assignment_token.clone());
        Ok(token.and_then(|t| registry.assignments.get(&t).cloned()))
    }

    async fn get_device_for_assignment(
        &self,
        assignment: &DeviceAssignment,
    ) -> Result<Option<Device>> {
        Ok(self
            .registry
            .read()
            .devices
            .get(&assignment.device_hardware_id)
            .cloned())
    }

    async fn release_device_assignment(
        &self,
        _ctx: &ExecutionContext,
        token: &str,
    ) -> Result<DeviceAssignment> {
        let mut registry = self.registry.write();
        let assignment = registry
            .assignments
            .get_mut(token)
            .ok_or_else(|| Error::AssignmentNotFound(token.to_string()))?;
        assignment.status = DeviceAssignmentStatus::Released;
        assignment.released_date = Some(Utc::now());
        let released = assignment.clone();

        if let Some(device) = registry.devices.get_mut(&released.device_hardware_id) {
            if device.assignment_token.as_deref() == Some(token) {
                device.assignment_token = None;
            }
        }
        Ok(released)
    }

    async fn create_device_command(
        &self,
        _ctx: &ExecutionContext,
        specification_token: &str,
        request: DeviceCommandCreateRequest,
    ) -> Result<DeviceCommand> {
        let mut registry = self.registry.write();
        if !registry.specifications.contains_key(specification_token) {
            return Err(Error::SpecificationNotFound(specification_token.to_string()));
        }
        let duplicate = registry.commands.values().any(|c| {
            c.specification_token == specification_token
                && c.name == request.name
                && c.namespace == request.namespace
        });
        if duplicate {
            return Err(Error::DuplicateCommand {
                specification_token: specification_token.to_string(),
                name: request.name,
            });
        }

        let command = DeviceCommand {
            token: request.token.unwrap_or_else(new_token),
            specification_token: specification_token.to_string(),
            name: request.name,
            namespace: request.namespace,
            description: request.description,
            parameters: request.parameters,
        };
        registry
            .commands
            .insert(command.token.clone(), command.clone());
        Ok(command)
    }

    async fn get_device_command_by_token(&self, token: &str) -> Result<Option<DeviceCommand>> {
        Ok(self.registry.read().commands.get(token).cloned())
    }

    async fn add_device_measurements(
        &self,
        _ctx: &ExecutionContext,
        assignment_token: &str,
        request: &MeasurementsCreateRequest,
    ) -> Result<DeviceMeasurements> {
        let info = self.event_info(
            assignment_token,
            request.event_date,
            &request.metadata,
            request.update_state,
            |state, _| {
                for (name, value) in &request.measurements {
                    state.latest_measurements.insert(name.clone(), *value);
                }
            },
        )?;
        let stored = DeviceMeasurements {
            info,
            measurements: request.measurements.clone(),
        };
        self.measurements
            .entry(assignment_token.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn add_device_location(
        &self,
        _ctx: &ExecutionContext,
        assignment_token: &str,
        request: &LocationCreateRequest,
    ) -> Result<DeviceLocation> {
        let build = |info: DeviceEventInfo| DeviceLocation {
            info,
            latitude: request.latitude,
            longitude: request.longitude,
            elevation: request.elevation,
        };
        let info = self.event_info(
            assignment_token,
            request.event_date,
            &request.metadata,
            request.update_state,
            |state, info| state.last_location = Some(build(info.clone())),
        )?;
        let stored = build(info);
        self.locations
            .entry(assignment_token.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn add_device_alert(
        &self,
        _ctx: &ExecutionContext,
        assignment_token: &str,
        request: &AlertCreateRequest,
    ) -> Result<DeviceAlert> {
        let build = |info: DeviceEventInfo| DeviceAlert {
            info,
            alert_type: request.alert_type.clone(),
            message: request.message.clone(),
            level: request.level,
            source: request.source,
        };
        let info = self.event_info(
            assignment_token,
            request.event_date,
            &request.metadata,
            request.update_state,
            |state, info| {
                state
                    .latest_alerts
                    .insert(request.alert_type.clone(), build(info.clone()));
            },
        )?;
        let stored = build(info);
        self.alerts
            .entry(assignment_token.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn add_device_command_response(
        &self,
        _ctx: &ExecutionContext,
        assignment_token: &str,
        request: &CommandResponseCreateRequest,
    ) -> Result<DeviceCommandResponse> {
        let info = self.event_info(
            assignment_token,
            request.event_date,
            &request.metadata,
            request.update_state,
            |_, _| {},
        )?;
        let stored = DeviceCommandResponse {
            info,
            originating_event_id: request.originating_event_id.clone(),
            response_event_id: request.response_event_id.clone(),
            response: request.response.clone(),
        };
        if let Some(mut invocation) = self.invocations.get_mut(&request.originating_event_id) {
            invocation.status = CommandStatus::Responded;
        }
        self.responses
            .entry(assignment_token.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn add_device_command_invocation(
        &self,
        _ctx: &ExecutionContext,
        assignment_token: &str,
        command: &DeviceCommand,
        request: DeviceCommandInvocationCreateRequest,
    ) -> Result<DeviceCommandInvocation> {
        let site_token = self
            .registry
            .read()
            .assignments
            .get(assignment_token)
            .map(|a| a.site_token.clone())
            .ok_or_else(|| Error::AssignmentNotFound(assignment_token.to_string()))?;

        let now = Utc::now();
        let invocation = DeviceCommandInvocation {
            id: new_token(),
            command_token: command.token.clone(),
            assignment_token: assignment_token.to_string(),
            site_token: Some(site_token),
            initiator: request.initiator,
            initiator_id: request.initiator_id,
            target: request.target,
            target_id: request.target_id,
            parameter_values: request.parameter_values,
            status: request.status.unwrap_or(CommandStatus::Pending),
            event_date: now,
            received_date: now,
            metadata: request.metadata,
        };
        self.invocations
            .insert(invocation.id.clone(), invocation.clone());
        Ok(invocation)
    }

    async fn create_batch_operation(
        &self,
        _ctx: &ExecutionContext,
        request: BatchOperationCreateRequest,
    ) -> Result<BatchOperation> {
        let operation = BatchOperation {
            token: request.token.unwrap_or_else(new_token),
            operation_type: request.operation_type,
            parameters: request.parameters,
            metadata: request.metadata,
            hardware_ids: request.hardware_ids,
            processing_status: BatchOperationStatus::Unprocessed,
            created_date: Utc::now(),
            processing_started_date: None,
            processing_ended_date: None,
        };
        let elements = operation
            .hardware_ids
            .iter()
            .enumerate()
            .map(|(index, hardware_id)| BatchElement {
                batch_operation_token: operation.token.clone(),
                hardware_id: hardware_id.clone(),
                index,
                processing_status: ElementProcessingStatus::Unprocessed,
                processed_date: None,
                metadata: HashMap::new(),
            })
            .collect();

        let mut registry = self.registry.write();
        registry
            .batch_elements
            .insert(operation.token.clone(), elements);
        registry
            .batch_operations
            .insert(operation.token.clone(), operation.clone());
        Ok(operation)
    }

    async fn get_batch_operation(&self, token: &str) -> Result<Option<BatchOperation>> {
        Ok(self.registry.read().batch_operations.get(token).cloned())
    }

    async fn list_batch_elements(&self, token: &str) -> Result<Vec<BatchElement>> {
        Ok(self
            .registry
            .read()
            .batch_elements
            .get(token)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_batch_operation(
        &self,
        token: &str,
        status: BatchOperationStatus,
    ) -> Result<BatchOperation> {
        let mut registry = self.registry.write();
        let operation = registry
            .batch_operations
            .get_mut(token)
            .ok_or_else(|| Error::BatchOperationNotFound(token.to_string()))?;
        let now = Utc::now();
        match status {
            BatchOperationStatus::Processing => operation.processing_started_date = Some(now),
            BatchOperationStatus::FinishedSuccessfully | BatchOperationStatus::FinishedWithErrors => {
                operation.processing_ended_date = Some(now)
            }
            BatchOperationStatus::Unprocessed => {}
        }
        operation.processing_status = status;
        Ok(operation.clone())
    }

    async fn update_batch_element(
        &self,
        token: &str,
        index: usize,
        status: ElementProcessingStatus,
        metadata: HashMap<String, String>,
    ) -> Result<BatchElement> {
        let mut registry = self.registry.write();
        let element = registry
            .batch_elements
            .get_mut(token)
            .and_then(|elements| elements.get_mut(index))
            .ok_or_else(|| Error::BatchOperationNotFound(format!("{}[{}]", token, index)))?;
        element.processing_status = status;
        element.processed_date = Some(Utc::now());
        element.metadata.extend(metadata);
        Ok(element.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandInitiator, CommandTarget, DeviceAssignmentType};

    fn ctx() -> ExecutionContext {
        ExecutionContext::system()
    }

    async fn setup() -> (InMemoryDeviceManagement, Device) {
        let mgmt = InMemoryDeviceManagement::new();
        let site = mgmt
            .create_site(&ctx(), SiteCreateRequest { name: "HQ".into(), ..Default::default() })
            .await
            .unwrap();
        let spec = mgmt
            .create_device_specification(
                &ctx(),
                DeviceSpecificationCreateRequest { name: "sensor".into(), ..Default::default() },
            )
            .await
            .unwrap();
        let device = mgmt
            .create_device(
                &ctx(),
                DeviceCreateRequest {
                    hardware_id: "hw-1".into(),
                    site_token: site.token,
                    specification_token: spec.token,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (mgmt, device)
    }

    fn assign(hardware_id: &str, assignment_type: DeviceAssignmentType) -> DeviceAssignmentCreateRequest {
        DeviceAssignmentCreateRequest {
            device_hardware_id: hardware_id.into(),
            assignment_type,
            asset_reference: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_second_assignment_rejected() {
        let (mgmt, device) = setup().await;
        let first = mgmt
            .create_device_assignment(&ctx(), assign(&device.hardware_id, DeviceAssignmentType::Unassociated))
            .await
            .unwrap();

        let second = mgmt
            .create_device_assignment(&ctx(), assign(&device.hardware_id, DeviceAssignmentType::Associated))
            .await;
        assert!(matches!(second, Err(Error::DeviceAlreadyAssigned(_))));

        let current = mgmt.get_current_device_assignment(&device).await.unwrap().unwrap();
        assert_eq!(current.token, first.token);
        assert_eq!(current.assignment_type, DeviceAssignmentType::Unassociated);
    }

    #[tokio::test]
    async fn test_release_allows_new_assignment() {
        let (mgmt, device) = setup().await;
        let first = mgmt
            .create_device_assignment(&ctx(), assign(&device.hardware_id, DeviceAssignmentType::Unassociated))
            .await
            .unwrap();
        mgmt.release_device_assignment(&ctx(), &first.token).await.unwrap();

        let second = mgmt
            .create_device_assignment(&ctx(), assign(&device.hardware_id, DeviceAssignmentType::Associated))
            .await
            .unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(mgmt.assignments_for_device("hw-1").len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_command_rejected() {
        let (mgmt, device) = setup().await;
        let request = DeviceCommandCreateRequest {
            name: "reboot".into(),
            namespace: Some("sys".into()),
            ..Default::default()
        };
        mgmt.create_device_command(&ctx(), &device.specification_token, request.clone())
            .await
            .unwrap();

        let duplicate = mgmt
            .create_device_command(&ctx(), &device.specification_token, request)
            .await;
        assert!(matches!(duplicate, Err(Error::DuplicateCommand { .. })));

        // Same name in another namespace is fine
        let other = DeviceCommandCreateRequest {
            name: "reboot".into(),
            namespace: Some("app".into()),
            ..Default::default()
        };
        assert!(mgmt
            .create_device_command(&ctx(), &device.specification_token, other)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_measurements_update_state() {
        let (mgmt, device) = setup().await;
        let assignment = mgmt
            .create_device_assignment(&ctx(), assign(&device.hardware_id, DeviceAssignmentType::Unassociated))
            .await
            .unwrap();

        let mut request = MeasurementsCreateRequest::default();
        request.measurements.insert("temp".into(), 21.5);
        request.update_state = true;
        let stored = mgmt
            .add_device_measurements(&ctx(), &assignment.token, &request)
            .await
            .unwrap();
        assert_eq!(stored.info.device_hardware_id, "hw-1");

        let refreshed = mgmt
            .get_device_assignment_by_token(&assignment.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.state.latest_measurements.get("temp"), Some(&21.5));
        assert_eq!(mgmt.list_measurements(&assignment.token).len(), 1);
    }

    #[tokio::test]
    async fn test_response_marks_invocation() {
        let (mgmt, device) = setup().await;
        let assignment = mgmt
            .create_device_assignment(&ctx(), assign(&device.hardware_id, DeviceAssignmentType::Unassociated))
            .await
            .unwrap();
        let command = mgmt
            .create_device_command(
                &ctx(),
                &device.specification_token,
                DeviceCommandCreateRequest { name: "ping".into(), ..Default::default() },
            )
            .await
            .unwrap();
        let invocation = mgmt
            .add_device_command_invocation(
                &ctx(),
                &assignment.token,
                &command,
                DeviceCommandInvocationCreateRequest {
                    command_token: command.token.clone(),
                    initiator: CommandInitiator::Rest,
                    initiator_id: None,
                    target: CommandTarget::Assignment,
                    target_id: assignment.token.clone(),
                    parameter_values: HashMap::new(),
                    status: None,
                    metadata: HashMap::new(),
                },
            )
            .await
            .unwrap();

        let response = CommandResponseCreateRequest {
            originating_event_id: invocation.id.clone(),
            response: Some("pong".into()),
            ..Default::default()
        };
        mgmt.add_device_command_response(&ctx(), &assignment.token, &response)
            .await
            .unwrap();

        let updated = mgmt.get_command_invocation(&invocation.id).unwrap();
        assert_eq!(updated.status, CommandStatus::Responded);
    }
}
