//! MQTT transport: command delivery and inbound event receiving.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwire_core::model::{DeviceAssignment, DeviceCommandExecution, SystemCommand};
use fleetwire_core::{Error, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MqttConfig;
use crate::decoder::EventContext;
use crate::delivery::{CommandDeliveryProvider, HardwareIdTopicExtractor, TopicParameters};
use crate::destination::DefaultCommandDestination;
use crate::encoder::JsonCommandExecutionEncoder;
use crate::nesting::NestingContext;
use crate::source::{EncodedEventSink, InboundEventReceiver};

/// Context key holding the topic a payload was published on.
pub const CONTEXT_TOPIC: &str = "topic";

const MAX_LOGGED_ERRORS: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

fn mqtt_options(config: &MqttConfig, prefix: &str) -> MqttOptions {
    let client_id = config
        .client_id
        .clone()
        .map(|id| format!("{}-{}", id, prefix))
        .unwrap_or_else(|| format!("fleetwire-{}-{}", prefix, Uuid::new_v4()));
    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options
}

/// Drive the event loop until cancelled, handing publishes to `on_publish`.
async fn poll_loop<F, Fut>(mut event_loop: EventLoop, cancel: CancellationToken, name: String, mut on_publish: F)
where
    F: FnMut(String, Vec<u8>) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut error_count = 0u32;
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = event_loop.poll() => polled,
        };
        match polled {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                error_count = 0;
                on_publish(p.topic.clone(), p.payload.to_vec()).await;
            }
            Ok(_) => error_count = 0,
            Err(e) => {
                error_count += 1;
                if error_count <= MAX_LOGGED_ERRORS {
                    error!(client = %name, error = %e, "MQTT connection error");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    debug!(client = %name, "MQTT event loop stopped");
}

/// JSON-over-MQTT destination publishing to the configured topic templates.
pub fn mqtt_destination(
    destination_id: impl Into<String>,
    config: &MqttConfig,
) -> DefaultCommandDestination<Vec<u8>, TopicParameters> {
    DefaultCommandDestination::new(destination_id)
        .with_encoder(Arc::new(JsonCommandExecutionEncoder::new()))
        .with_extractor(Arc::new(HardwareIdTopicExtractor::from_config(config)))
        .with_provider(Arc::new(MqttCommandDeliveryProvider::new(config.clone())))
}

/// Publishes encoded commands to per-device topics.
pub struct MqttCommandDeliveryProvider {
    config: MqttConfig,
    client: Mutex<Option<AsyncClient>>,
    cancel: Mutex<Option<CancellationToken>>,
    state: LifecycleState,
}

impl MqttCommandDeliveryProvider {
    /// Not connected until `start`.
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            cancel: Mutex::new(None),
            state: LifecycleState::new(),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| Error::Delivery("MQTT delivery provider is not started".to_string()))?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Delivery(format!("Failed to publish to {}: {}", topic, e)))
    }
}

#[async_trait]
impl LifecycleComponent for MqttCommandDeliveryProvider {
    fn component_name(&self) -> String {
        format!("MQTT delivery provider ({}:{})", self.config.host, self.config.port)
    }

    async fn start(&self) -> Result<()> {
        let (client, event_loop) = AsyncClient::new(mqtt_options(&self.config, "outbound"), 10);
        let cancel = CancellationToken::new();
        tokio::spawn(poll_loop(
            event_loop,
            cancel.clone(),
            self.component_name(),
            |_, _| async {},
        ));
        *self.client.lock() = Some(client);
        *self.cancel.lock() = Some(cancel);
        self.state.set(LifecycleStatus::Started);
        info!(host = %self.config.host, port = self.config.port, "MQTT delivery provider started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let client = self.client.lock().take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "Failed to disconnect MQTT delivery client");
            }
        }
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl CommandDeliveryProvider<Vec<u8>, TopicParameters> for MqttCommandDeliveryProvider {
    async fn deliver(
        &self,
        nesting: &NestingContext,
        _assignment: &DeviceAssignment,
        execution: &DeviceCommandExecution,
        encoded: Vec<u8>,
        parameters: TopicParameters,
    ) -> Result<()> {
        debug!(
            topic = %parameters.command_topic,
            hardware_id = %nesting.gateway.hardware_id,
            command = %execution.command.name,
            "Publishing command"
        );
        self.publish(&parameters.command_topic, encoded).await
    }

    async fn deliver_system_command(
        &self,
        nesting: &NestingContext,
        _assignment: Option<&DeviceAssignment>,
        _command: &SystemCommand,
        encoded: Vec<u8>,
        parameters: TopicParameters,
    ) -> Result<()> {
        debug!(
            topic = %parameters.system_topic,
            hardware_id = %nesting.gateway.hardware_id,
            "Publishing system command"
        );
        self.publish(&parameters.system_topic, encoded).await
    }
}

/// Subscribes to the input topic and forwards payload bytes.
pub struct MqttInboundEventReceiver {
    config: MqttConfig,
    client: Mutex<Option<AsyncClient>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MqttInboundEventReceiver {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }
}

#[async_trait]
impl InboundEventReceiver<Vec<u8>> for MqttInboundEventReceiver {
    fn receiver_name(&self) -> String {
        format!("mqtt://{}:{}/{}", self.config.host, self.config.port, self.config.input_topic)
    }

    async fn start(&self, sink: Arc<dyn EncodedEventSink<Vec<u8>>>) -> Result<()> {
        let (client, event_loop) = AsyncClient::new(mqtt_options(&self.config, "inbound"), 10);
        client
            .subscribe(self.config.input_topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Configuration(format!("Failed to subscribe to {}: {}", self.config.input_topic, e)))?;

        let cancel = CancellationToken::new();
        tokio::spawn(poll_loop(
            event_loop,
            cancel.clone(),
            self.receiver_name(),
            move |topic, payload| {
                let sink = sink.clone();
                async move {
                    let context = EventContext::new().with(CONTEXT_TOPIC, topic);
                    sink.on_encoded_event_received(payload, context).await;
                }
            },
        ));
        *self.client.lock() = Some(client);
        *self.cancel.lock() = Some(cancel);
        info!(topic = %self.config.input_topic, "MQTT event receiver subscribed");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let client = self.client.lock().take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "Failed to disconnect MQTT receiver client");
            }
        }
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::CommandDestination;
    use fleetwire_core::model::{Device, RegistrationSuccessReason};

    fn config() -> MqttConfig {
        MqttConfig {
            host: "broker.local".into(),
            port: 1884,
            keep_alive_secs: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_options_derive_client_id() {
        let mut config = config();
        let generated = mqtt_options(&config, "inbound");
        assert!(generated.client_id().starts_with("fleetwire-inbound-"));
        assert_eq!(generated.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(generated.keep_alive(), Duration::from_secs(30));

        config.client_id = Some("edge".into());
        assert_eq!(mqtt_options(&config, "outbound").client_id(), "edge-outbound");
    }

    #[test]
    fn test_receiver_name_includes_input_topic() {
        let receiver = MqttInboundEventReceiver::new(config());
        assert_eq!(receiver.receiver_name(), "mqtt://broker.local:1884/fleetwire/input/json");
    }

    #[tokio::test]
    async fn test_delivery_requires_started_provider() {
        let provider = MqttCommandDeliveryProvider::new(config());
        let nesting = NestingContext {
            gateway: Device::new("gw-1", "site", "spec"),
            nested: None,
            path: None,
        };
        let err = provider
            .deliver_system_command(
                &nesting,
                None,
                &SystemCommand::ack(RegistrationSuccessReason::NewRegistration),
                b"{}".to_vec(),
                TopicParameters {
                    command_topic: "c".into(),
                    system_topic: "s".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
    }

    #[tokio::test]
    async fn test_destination_encodes_before_publishing() {
        let destination = mqtt_destination("mqtt", &config());
        assert_eq!(destination.destination_id(), "mqtt");

        let nesting = NestingContext {
            gateway: Device::new("gw-1", "site", "spec"),
            nested: None,
            path: None,
        };
        let err = destination
            .deliver_system_command(
                &SystemCommand::ack(RegistrationSuccessReason::AlreadyRegistered),
                &nesting,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delivery(ref m) if m.contains("not started")));
    }
}
