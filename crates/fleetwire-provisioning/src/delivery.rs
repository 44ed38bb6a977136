//! Delivery parameter extractors and delivery providers.

use async_trait::async_trait;
use fleetwire_core::model::{DeviceAssignment, DeviceCommandExecution, SystemCommand};
use fleetwire_core::{Error, LifecycleComponent, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::MqttConfig;
use crate::nesting::NestingContext;

/// Computes transport parameters (topic, address, ...) for a delivery.
///
/// `execution` is `None` for system commands.
pub trait CommandDeliveryParameterExtractor<P>: LifecycleComponent {
    fn extract_delivery_parameters(
        &self,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
        execution: Option<&DeviceCommandExecution>,
    ) -> Result<P>;
}

/// Ships an encoded payload to a device.
#[async_trait]
pub trait CommandDeliveryProvider<T, P>: LifecycleComponent
where
    T: Send + 'static,
    P: Send + 'static,
{
    async fn deliver(
        &self,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
        execution: &DeviceCommandExecution,
        encoded: T,
        parameters: P,
    ) -> Result<()>;

    async fn deliver_system_command(
        &self,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
        command: &SystemCommand,
        encoded: T,
        parameters: P,
    ) -> Result<()>;
}

/// Parameters for transports that need none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullParameters;

/// Extractor that always yields [`NullParameters`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NullParametersExtractor;

impl LifecycleComponent for NullParametersExtractor {
    fn component_name(&self) -> String {
        "Null parameters extractor".to_string()
    }
}

impl CommandDeliveryParameterExtractor<NullParameters> for NullParametersExtractor {
    fn extract_delivery_parameters(
        &self,
        _nesting: &NestingContext,
        _assignment: Option<&DeviceAssignment>,
        _execution: Option<&DeviceCommandExecution>,
    ) -> Result<NullParameters> {
        Ok(NullParameters)
    }
}

/// Topics a command is published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicParameters {
    pub command_topic: String,
    pub system_topic: String,
}

/// Builds per-gateway topics by substituting `{hardware_id}` in templates.
#[derive(Debug, Clone)]
pub struct HardwareIdTopicExtractor {
    command_topic_template: String,
    system_topic_template: String,
}

impl HardwareIdTopicExtractor {
    /// Build from explicit templates.
    pub fn new(command_topic_template: impl Into<String>, system_topic_template: impl Into<String>) -> Self {
        Self {
            command_topic_template: command_topic_template.into(),
            system_topic_template: system_topic_template.into(),
        }
    }

    /// Use the command and system topic templates from the MQTT settings.
    pub fn from_config(config: &MqttConfig) -> Self {
        Self::new(config.command_topic.clone(), config.system_topic.clone())
    }
}

impl Default for HardwareIdTopicExtractor {
    fn default() -> Self {
        Self::from_config(&MqttConfig::default())
    }
}

impl LifecycleComponent for HardwareIdTopicExtractor {
    fn component_name(&self) -> String {
        "Hardware id topic extractor".to_string()
    }
}

impl CommandDeliveryParameterExtractor<TopicParameters> for HardwareIdTopicExtractor {
    fn extract_delivery_parameters(
        &self,
        nesting: &NestingContext,
        _assignment: Option<&DeviceAssignment>,
        _execution: Option<&DeviceCommandExecution>,
    ) -> Result<TopicParameters> {
        let hardware_id = &nesting.gateway.hardware_id;
        Ok(TopicParameters {
            command_topic: self.command_topic_template.replace("{hardware_id}", hardware_id),
            system_topic: self.system_topic_template.replace("{hardware_id}", hardware_id),
        })
    }
}

/// A delivery captured by [`ChannelDeliveryProvider`].
#[derive(Debug, Clone)]
pub struct DeliveredCommand<T, P> {
    /// Addressing used for the delivery
    pub nesting: NestingContext,
    pub assignment_token: Option<String>,
    /// Set for regular commands
    pub execution: Option<DeviceCommandExecution>,
    /// Set for system commands
    pub system_command: Option<SystemCommand>,
    pub encoded: T,
    pub parameters: P,
}

impl<T, P> DeliveredCommand<T, P> {
    /// Hardware id the delivery was addressed to.
    pub fn gateway_hardware_id(&self) -> &str {
        &self.nesting.gateway.hardware_id
    }
}

/// In-process provider that forwards deliveries onto a channel.
pub struct ChannelDeliveryProvider<T, P> {
    name: String,
    sender: mpsc::UnboundedSender<DeliveredCommand<T, P>>,
}

impl<T, P> ChannelDeliveryProvider<T, P> {
    /// Returns the provider and the receiving end of its deliveries.
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<DeliveredCommand<T, P>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }

    fn send(&self, delivery: DeliveredCommand<T, P>) -> Result<()> {
        self.sender
            .send(delivery)
            .map_err(|_| Error::Delivery(format!("Channel for provider '{}' is closed", self.name)))
    }
}

impl<T, P> LifecycleComponent for ChannelDeliveryProvider<T, P>
where
    T: Send + Sync,
    P: Send + Sync,
{
    fn component_name(&self) -> String {
        format!("Channel delivery provider ({})", self.name)
    }
}

#[async_trait]
impl<T, P> CommandDeliveryProvider<T, P> for ChannelDeliveryProvider<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    async fn deliver(
        &self,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
        execution: &DeviceCommandExecution,
        encoded: T,
        parameters: P,
    ) -> Result<()> {
        debug!(
            provider = %self.name,
            hardware_id = %nesting.gateway.hardware_id,
            command = %execution.command.name,
            "Delivering command"
        );
        self.send(DeliveredCommand {
            nesting: nesting.clone(),
            assignment_token: Some(assignment.token.clone()),
            execution: Some(execution.clone()),
            system_command: None,
            encoded,
            parameters,
        })
    }

    async fn deliver_system_command(
        &self,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
        command: &SystemCommand,
        encoded: T,
        parameters: P,
    ) -> Result<()> {
        debug!(
            provider = %self.name,
            hardware_id = %nesting.gateway.hardware_id,
            "Delivering system command"
        );
        self.send(DeliveredCommand {
            nesting: nesting.clone(),
            assignment_token: assignment.map(|a| a.token.clone()),
            execution: None,
            system_command: Some(command.clone()),
            encoded,
            parameters,
        })
    }
}
