//! Device commands, invocations and executions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
}

impl ParameterType {
    /// Whether values are carried as a 32-bit integer.
    pub fn is_int32(self) -> bool {
        matches!(
            self,
            ParameterType::Int32
                | ParameterType::UInt32
                | ParameterType::SInt32
                | ParameterType::Fixed32
                | ParameterType::SFixed32
        )
    }

    /// Whether values are carried as a 64-bit integer.
    pub fn is_int64(self) -> bool {
        matches!(
            self,
            ParameterType::Int64
                | ParameterType::UInt64
                | ParameterType::SInt64
                | ParameterType::Fixed64
                | ParameterType::SFixed64
        )
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::Double => "double",
            ParameterType::Float => "float",
            ParameterType::Int32 => "int32",
            ParameterType::Int64 => "int64",
            ParameterType::UInt32 => "uint32",
            ParameterType::UInt64 => "uint64",
            ParameterType::SInt32 => "sint32",
            ParameterType::SInt64 => "sint64",
            ParameterType::Fixed32 => "fixed32",
            ParameterType::Fixed64 => "fixed64",
            ParameterType::SFixed32 => "sfixed32",
            ParameterType::SFixed64 => "sfixed64",
            ParameterType::Bool => "bool",
            ParameterType::String => "string",
            ParameterType::Bytes => "bytes",
        };
        write!(f, "{}", name)
    }
}

/// Parameter declared by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub required: bool,
}

impl CommandParameter {
    pub fn new(name: impl Into<String>, parameter_type: ParameterType, required: bool) -> Self {
        Self {
            name: name.into(),
            parameter_type,
            required,
        }
    }
}

/// A command a device specification understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Unique token
    pub token: String,
    /// Owning specification
    pub specification_token: String,
    pub name: String,
    /// Optional namespace; name and namespace are unique per specification
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered parameter schema
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
}

impl DeviceCommand {
    /// Name qualified with its namespace, if any.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// Who initiated a command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandInitiator {
    Rest,
    BatchOperation,
    Script,
}

/// What an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTarget {
    Assignment,
}

/// Processing status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Responded,
}

/// A request for a device to perform a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommandInvocation {
    /// Event id
    pub id: String,
    pub command_token: String,
    pub assignment_token: String,
    #[serde(default)]
    pub site_token: Option<String>,
    pub initiator: CommandInitiator,
    #[serde(default)]
    pub initiator_id: Option<String>,
    pub target: CommandTarget,
    pub target_id: String,
    /// Raw parameter values keyed by parameter name
    #[serde(default)]
    pub parameter_values: HashMap<String, String>,
    pub status: CommandStatus,
    pub event_date: DateTime<Utc>,
    pub received_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A parameter value coerced to its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl ParameterValue {
    /// Integer value, widening 32-bit values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParameterValue::Int32(v) => Some(i64::from(*v)),
            ParameterValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point value, widening single precision.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(f64::from(*v)),
            ParameterValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Command and invocation merged into transport-ready form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCommandExecution {
    pub command: DeviceCommand,
    pub invocation: DeviceCommandInvocation,
    /// Coerced parameters; absent optional parameters are omitted
    pub parameters: BTreeMap<String, ParameterValue>,
}

/// Reason attached to a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationSuccessReason {
    NewRegistration,
    AlreadyRegistered,
}

/// Reason attached to a rejected registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationFailureReason {
    NewDevicesNotAllowed,
    InvalidSpecificationToken,
    SiteTokenRequired,
}

/// Command generated by the platform itself rather than an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemCommand {
    RegistrationAck {
        reason: RegistrationSuccessReason,
    },
    RegistrationFailure {
        reason: RegistrationFailureReason,
        message: String,
    },
}

impl SystemCommand {
    pub fn ack(reason: RegistrationSuccessReason) -> Self {
        SystemCommand::RegistrationAck { reason }
    }

    pub fn failure(reason: RegistrationFailureReason, message: impl Into<String>) -> Self {
        SystemCommand::RegistrationFailure {
            reason,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_families() {
        assert!(ParameterType::Fixed32.is_int32());
        assert!(!ParameterType::Fixed32.is_int64());
        assert!(ParameterType::SFixed64.is_int64());
        assert!(!ParameterType::Double.is_int32());
    }

    #[test]
    fn test_system_command_serialization() {
        let cmd = SystemCommand::failure(RegistrationFailureReason::SiteTokenRequired, "need site");
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "registration_failure");
        assert_eq!(json["reason"], "site_token_required");
        assert_eq!(json["message"], "need site");
    }

    #[test]
    fn test_qualified_name() {
        let mut command = DeviceCommand {
            token: "c1".into(),
            specification_token: "s1".into(),
            name: "ping".into(),
            namespace: None,
            description: None,
            parameters: vec![],
        };
        assert_eq!(command.qualified_name(), "ping");
        command.namespace = Some("diag".into());
        assert_eq!(command.qualified_name(), "diag:ping");
    }
}
