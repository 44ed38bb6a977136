//! Command destinations.
//!
//! A destination bundles an encoder, a delivery parameter extractor and a
//! delivery provider for one transport. Routers pick a destination by id.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{DeviceAssignment, DeviceCommandExecution, SystemCommand};
use fleetwire_core::{Error, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use tracing::{debug, info, warn};

use crate::delivery::{CommandDeliveryParameterExtractor, CommandDeliveryProvider};
use crate::encoder::CommandExecutionEncoder;
use crate::nesting::NestingContext;

/// A named transport-specific delivery channel.
#[async_trait]
pub trait CommandDestination: LifecycleComponent {
    /// Unique id routers refer to this destination by.
    fn destination_id(&self) -> &str;

    async fn deliver_command(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<()>;

    async fn deliver_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<()>;
}

/// Destination assembled from an encoder, extractor and provider.
///
/// All three must be configured before [`LifecycleComponent::start`].
pub struct DefaultCommandDestination<T, P>
where
    T: Send + 'static,
    P: Send + 'static,
{
    destination_id: String,
    encoder: Option<Arc<dyn CommandExecutionEncoder<T>>>,
    extractor: Option<Arc<dyn CommandDeliveryParameterExtractor<P>>>,
    provider: Option<Arc<dyn CommandDeliveryProvider<T, P>>>,
    state: LifecycleState,
}

impl<T, P> DefaultCommandDestination<T, P>
where
    T: Send + 'static,
    P: Send + 'static,
{
    /// Creates an empty destination; `start` fails until an encoder,
    /// extractor and provider are all set.
    pub fn new(destination_id: impl Into<String>) -> Self {
        Self {
            destination_id: destination_id.into(),
            encoder: None,
            extractor: None,
            provider: None,
            state: LifecycleState::new(),
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn CommandExecutionEncoder<T>>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn CommandDeliveryParameterExtractor<P>>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn CommandDeliveryProvider<T, P>>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn parts(
        &self,
    ) -> Result<(
        &Arc<dyn CommandExecutionEncoder<T>>,
        &Arc<dyn CommandDeliveryParameterExtractor<P>>,
        &Arc<dyn CommandDeliveryProvider<T, P>>,
    )> {
        let missing = |what: &str| {
            Error::Configuration(format!(
                "No {} configured for command destination '{}'",
                what, self.destination_id
            ))
        };
        let encoder = self.encoder.as_ref().ok_or_else(|| missing("command execution encoder"))?;
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| missing("delivery parameter extractor"))?;
        let provider = self.provider.as_ref().ok_or_else(|| missing("delivery provider"))?;
        Ok((encoder, extractor, provider))
    }
}

#[async_trait]
impl<T, P> LifecycleComponent for DefaultCommandDestination<T, P>
where
    T: Send + 'static,
    P: Send + 'static,
{
    fn component_name(&self) -> String {
        format!("Command destination ({})", self.destination_id)
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        let result = async {
            let (encoder, extractor, provider) = self.parts()?;
            encoder.start().await?;
            extractor.start().await?;
            provider.start().await
        }
        .await;

        match result {
            Ok(()) => {
                self.state.set(LifecycleStatus::Started);
                info!(destination_id = %self.destination_id, "Command destination started");
                Ok(())
            }
            Err(e) => {
                self.state.set(LifecycleStatus::Error);
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopping);
        if let Some(provider) = &self.provider {
            if let Err(e) = provider.stop().await {
                warn!(destination_id = %self.destination_id, error = %e, "Failed to stop delivery provider");
            }
        }
        if let Some(extractor) = &self.extractor {
            if let Err(e) = extractor.stop().await {
                warn!(destination_id = %self.destination_id, error = %e, "Failed to stop parameter extractor");
            }
        }
        if let Some(encoder) = &self.encoder {
            if let Err(e) = encoder.stop().await {
                warn!(destination_id = %self.destination_id, error = %e, "Failed to stop encoder");
            }
        }
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl<T, P> CommandDestination for DefaultCommandDestination<T, P>
where
    T: Send + 'static,
    P: Send + 'static,
{
    fn destination_id(&self) -> &str {
        &self.destination_id
    }

    async fn deliver_command(
        &self,
        execution: &DeviceCommandExecution,
        nesting: &NestingContext,
        assignment: &DeviceAssignment,
    ) -> Result<()> {
        let (encoder, extractor, provider) = self.parts()?;
        let encoded = encoder.encode(execution, nesting, assignment)?;
        let parameters = extractor.extract_delivery_parameters(nesting, Some(assignment), Some(execution))?;
        debug!(
            destination_id = %self.destination_id,
            hardware_id = %nesting.gateway.hardware_id,
            command = %execution.command.name,
            "Delivering command execution"
        );
        provider
            .deliver(nesting, assignment, execution, encoded, parameters)
            .await
    }

    async fn deliver_system_command(
        &self,
        command: &SystemCommand,
        nesting: &NestingContext,
        assignment: Option<&DeviceAssignment>,
    ) -> Result<()> {
        let (encoder, extractor, provider) = self.parts()?;
        let encoded = encoder.encode_system_command(command, nesting, assignment)?;
        let parameters = extractor.extract_delivery_parameters(nesting, assignment, None)?;
        debug!(
            destination_id = %self.destination_id,
            hardware_id = %nesting.gateway.hardware_id,
            "Delivering system command"
        );
        provider
            .deliver_system_command(nesting, assignment, command, encoded, parameters)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{ChannelDeliveryProvider, NullParameters, NullParametersExtractor};
    use crate::encoder::JsonCommandExecutionEncoder;
    use fleetwire_core::model::{Device, RegistrationFailureReason};

    #[tokio::test]
    async fn test_missing_provider_fails_start() {
        let destination = DefaultCommandDestination::<Vec<u8>, NullParameters>::new("json")
            .with_encoder(Arc::new(JsonCommandExecutionEncoder::new()))
            .with_extractor(Arc::new(NullParametersExtractor));

        let err = destination.start().await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(destination.lifecycle_status(), LifecycleStatus::Error);
    }

    #[tokio::test]
    async fn test_missing_encoder_fails_start() {
        let (provider, _rx) = ChannelDeliveryProvider::<Vec<u8>, NullParameters>::new("test");
        let destination = DefaultCommandDestination::<Vec<u8>, NullParameters>::new("json")
            .with_extractor(Arc::new(NullParametersExtractor))
            .with_provider(Arc::new(provider));

        assert!(destination.start().await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_system_command_reaches_provider() {
        let (provider, mut rx) = ChannelDeliveryProvider::<Vec<u8>, NullParameters>::new("test");
        let destination = DefaultCommandDestination::<Vec<u8>, NullParameters>::new("json")
            .with_encoder(Arc::new(JsonCommandExecutionEncoder::new()))
            .with_extractor(Arc::new(NullParametersExtractor))
            .with_provider(Arc::new(provider));
        destination.start().await.unwrap();

        let nesting = NestingContext::standalone(Device::new("hw-1", "", "spec"));
        let command = SystemCommand::failure(RegistrationFailureReason::NewDevicesNotAllowed, "no");
        destination
            .deliver_system_command(&command, &nesting, None)
            .await
            .unwrap();

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.gateway_hardware_id(), "hw-1");
        assert_eq!(delivered.system_command, Some(command));
        assert!(delivered.execution.is_none());
        assert!(!delivered.encoded.is_empty());
    }
}
