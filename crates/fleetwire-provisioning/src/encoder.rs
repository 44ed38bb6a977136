//! Command execution encoders.
//!
//! An encoder turns a command execution (or a system command) into the
//! payload type a delivery provider ships.

use std::collections::BTreeMap;

use fleetwire_core::model::{DeviceAssignment, DeviceCommandExecution, ParameterValue, SystemCommand};
use fleetwire_core::{LifecycleComponent, Result};
use serde::Serialize;

use crate::nesting::NestingContext;

/// Encodes executions into a transport payload of type `T`.
pub trait CommandExecutionEncoder<T>: LifecycleComponent {
    fn encode(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<T>;

    fn encode_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<T>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandEnvelope<'a> {
    hardware_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    nested_hardware_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nested_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignment_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<CommandBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_command: Option<&'a SystemCommand>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    invocation_id: &'a str,
    parameters: &'a BTreeMap<String, ParameterValue>,
}

/// Encodes executions as JSON bytes addressed to the gateway.
#[derive(Debug, Default, Clone)]
pub struct JsonCommandExecutionEncoder;

impl JsonCommandExecutionEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleComponent for JsonCommandExecutionEncoder {
    fn component_name(&self) -> String {
        "JSON command execution encoder".to_string()
    }
}

impl CommandExecutionEncoder<Vec<u8>> for JsonCommandExecutionEncoder {
    fn encode(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<Vec<u8>> {
        let envelope = CommandEnvelope {
            hardware_id: &nesting.gateway.hardware_id,
            nested_hardware_id: nesting.nested.as_ref().map(|d| d.hardware_id.as_str()),
            nested_path: nesting.path.as_deref(),
            assignment_token: Some(&assignment.token),
            command: Some(CommandBody {
                name: &execution.command.name,
                namespace: execution.command.namespace.as_deref(),
                invocation_id: &execution.invocation.id,
                parameters: &execution.parameters,
            }),
            system_command: None,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn encode_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<Vec<u8>> {
        let envelope = CommandEnvelope {
            hardware_id: &nesting.gateway.hardware_id,
            nested_hardware_id: nesting.nested.as_ref().map(|d| d.hardware_id.as_str()),
            nested_path: nesting.path.as_deref(),
            assignment_token: assignment.map(|a| a.token.as_str()),
            command: None,
            system_command: Some(command),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_core::model::{Device, RegistrationSuccessReason};

    #[test]
    fn test_system_command_envelope() {
        let nesting = NestingContext {
            gateway: Device::new("gw", "site", "spec"),
            nested: Some(Device::new("child", "site", "spec")),
            path: Some("/a/b".into()),
        };
        let bytes = JsonCommandExecutionEncoder::new()
            .encode_system_command(
                &SystemCommand::ack(RegistrationSuccessReason::NewRegistration),
                &nesting,
                None,
            )
            .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["hardwareId"], "gw");
        assert_eq!(json["nestedHardwareId"], "child");
        assert_eq!(json["nestedPath"], "/a/b");
        assert_eq!(json["systemCommand"]["reason"], "new_registration");
        assert!(json.get("assignmentToken").is_none());
    }
}
