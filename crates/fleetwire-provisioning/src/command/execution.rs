//! Builds command executions from a command definition and an invocation.

use std::collections::BTreeMap;

use fleetwire_core::model::{
    CommandParameter, DeviceCommand, DeviceCommandExecution, DeviceCommandInvocation, ParameterType,
    ParameterValue,
};
use fleetwire_core::{Error, LifecycleComponent, Result};

/// Merges a command's parameter schema with an invocation's raw values.
pub trait CommandExecutionBuilder: LifecycleComponent {
    fn create_execution(
        &self,
        command: &DeviceCommand,
        invocation: &DeviceCommandInvocation,
    ) -> Result<DeviceCommandExecution>;
}

/// Coerces raw string values by declared parameter type.
#[derive(Debug, Default, Clone)]
pub struct DefaultCommandExecutionBuilder;

impl DefaultCommandExecutionBuilder {
    pub fn new() -> Self {
        Self
    }
}

/// Coerce one raw value to the parameter's declared type.
pub fn coerce_parameter(parameter: &CommandParameter, raw: &str) -> Result<ParameterValue> {
    let name = parameter.name.as_str();
    let ty = parameter.parameter_type;
    let value = match ty {
        ParameterType::Bool => {
            if raw.eq_ignore_ascii_case("true") {
                ParameterValue::Bool(true)
            } else if raw.eq_ignore_ascii_case("false") {
                ParameterValue::Bool(false)
            } else {
                return Err(Error::invalid_parameter(name, "boolean"));
            }
        }
        ParameterType::String => ParameterValue::String(raw.to_string()),
        ParameterType::Bytes => ParameterValue::Bytes(raw.as_bytes().to_vec()),
        ParameterType::Double => ParameterValue::Double(
            raw.parse::<f64>()
                .map_err(|_| Error::invalid_parameter(name, "double"))?,
        ),
        ParameterType::Float => ParameterValue::Float(
            raw.parse::<f32>()
                .map_err(|_| Error::invalid_parameter(name, "float"))?,
        ),
        t if t.is_int32() => ParameterValue::Int32(
            raw.parse::<i32>()
                .map_err(|_| Error::invalid_parameter(name, "integer"))?,
        ),
        t if t.is_int64() => ParameterValue::Int64(
            raw.parse::<i64>()
                .map_err(|_| Error::invalid_parameter(name, "long"))?,
        ),
        other => {
            return Err(Error::Configuration(format!(
                "Unhandled parameter type {} for field '{}'",
                other, name
            )))
        }
    };
    Ok(value)
}

impl LifecycleComponent for DefaultCommandExecutionBuilder {
    fn component_name(&self) -> String {
        "Default command execution builder".to_string()
    }
}

impl CommandExecutionBuilder for DefaultCommandExecutionBuilder {
    fn create_execution(
        &self,
        command: &DeviceCommand,
        invocation: &DeviceCommandInvocation,
    ) -> Result<DeviceCommandExecution> {
        let mut parameters = BTreeMap::new();
        for parameter in &command.parameters {
            match invocation.parameter_values.get(&parameter.name) {
                Some(raw) => {
                    parameters.insert(parameter.name.clone(), coerce_parameter(parameter, raw)?);
                }
                None if parameter.required => {
                    return Err(Error::RequiredParameterMissing(parameter.name.clone()));
                }
                None => {}
            }
        }

        Ok(DeviceCommandExecution {
            command: command.clone(),
            invocation: invocation.clone(),
            parameters,
        })
    }
}
