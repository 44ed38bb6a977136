//! Fleetwire provisioning pipeline
//!
//! Moves device events in and commands out:
//!
//! - **Inbound**: receivers and decoders feed an [`InboundEventSource`], whose
//!   requests are queued by an [`InboundProcessingStrategy`] and dispatched to
//!   the [`InboundEventProcessorChain`] (storage, registration).
//! - **Outbound**: stored events flow through an [`OutboundProcessingStrategy`]
//!   to the [`OutboundEventProcessorChain`]; the [`ProvisioningEventProcessor`]
//!   turns command invocations into deliveries.
//! - **Commands**: the [`CommandDispatcher`] builds executions, resolves
//!   nesting and routes to a [`CommandDestination`].
//!
//! [`DeviceProvisioning`] owns all of it.

pub mod batch;
pub mod chain;
pub mod command;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod destination;
pub mod encoder;
pub mod inbound;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod nesting;
pub mod outbound;
pub mod processor;
pub mod provisioning;
pub mod provisioning_processor;
pub mod registration;
pub mod router;
#[cfg(feature = "socket")]
pub mod socket;
pub mod source;
pub mod storage;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use batch::{BatchOperationManager, DefaultBatchOperationManager};
pub use chain::{InboundEventProcessorChain, OutboundEventProcessorChain};
pub use command::{
    CommandDispatcher, CommandExecutionBuilder, CommandProcessingStrategy, CommandTargetResolver,
    DefaultCommandExecutionBuilder, DefaultCommandProcessingStrategy, DefaultCommandTargetResolver,
};
pub use config::ProvisioningConfig;
pub use decoder::{
    DeviceEventBatch, DeviceEventDecoder, EchoStringDecoder, EventContext, JsonBatchEventDecoder,
    PayloadLoggerEventDecoder,
};
pub use delivery::{
    ChannelDeliveryProvider, CommandDeliveryParameterExtractor, CommandDeliveryProvider,
    DeliveredCommand, HardwareIdTopicExtractor, NullParameters, NullParametersExtractor,
    TopicParameters,
};
pub use destination::{CommandDestination, DefaultCommandDestination};
pub use encoder::{CommandExecutionEncoder, JsonCommandExecutionEncoder};
pub use inbound::{BlockingQueueInboundProcessingStrategy, InboundProcessingMetrics, InboundProcessingStrategy};
#[cfg(feature = "mqtt")]
pub use mqtt::{mqtt_destination, MqttCommandDeliveryProvider, MqttInboundEventReceiver};
pub use nesting::{NestedDeviceSupport, NestingContext};
pub use outbound::{
    BlockingQueueOutboundProcessingStrategy, DirectOutboundProcessingStrategy,
    OutboundEventDispatchingManagement, OutboundProcessingStrategy,
};
pub use processor::{InboundEventProcessor, OutboundEventProcessor};
pub use provisioning::DeviceProvisioning;
pub use provisioning_processor::ProvisioningEventProcessor;
pub use registration::{DefaultRegistrationManager, RegistrationManager};
pub use router::{OutboundCommandRouter, SingleChoiceCommandRouter, SpecificationMappingCommandRouter};
#[cfg(feature = "socket")]
pub use socket::SocketInboundEventReceiver;
pub use source::{
    ChannelEventReceiver, EncodedEventSink, EventSourceComponent, InboundEventReceiver,
    InboundEventSource,
};
pub use storage::DefaultEventStorageProcessor;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketEventReceiver;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::chain::{InboundEventProcessorChain, OutboundEventProcessorChain};
    pub use crate::config::ProvisioningConfig;
    pub use crate::destination::{CommandDestination, DefaultCommandDestination};
    pub use crate::processor::{InboundEventProcessor, OutboundEventProcessor};
    pub use crate::provisioning::DeviceProvisioning;
    pub use fleetwire_core::prelude::*;
}
