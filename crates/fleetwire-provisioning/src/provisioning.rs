//! Device provisioning facade.
//!
//! Owns every pipeline component and starts them in dependency order:
//!
//! 1. Command dispatcher (strategy, destinations, router)
//! 2. Outbound processor chain, with processing still disabled
//! 3. Outbound processing strategy
//! 4. Registration and batch operation managers
//! 5. Inbound processor chain and inbound processing strategy
//! 6. Inbound event sources
//!
//! Outbound processing is enabled last. Stop runs in reverse and is
//! best-effort.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{DeviceCommandInvocation, SystemCommand};
use fleetwire_core::{
    DeviceManagement, Error, ExecutionContext, LifecycleComponent, LifecycleState,
    LifecycleStatus, Result,
};
use tracing::{info, warn};

use crate::batch::{BatchOperationManager, DefaultBatchOperationManager};
use crate::chain::{InboundEventProcessorChain, OutboundEventProcessorChain};
use crate::command::{CommandDispatcher, DefaultCommandProcessingStrategy};
use crate::config::{ProvisioningConfig, RouterConfig};
use crate::destination::CommandDestination;
use crate::inbound::{BlockingQueueInboundProcessingStrategy, InboundProcessingStrategy};
use crate::outbound::{
    BlockingQueueOutboundProcessingStrategy, OutboundEventDispatchingManagement,
    OutboundProcessingStrategy,
};
use crate::provisioning_processor::ProvisioningEventProcessor;
use crate::registration::{DefaultRegistrationManager, RegistrationManager};
use crate::router::{OutboundCommandRouter, SingleChoiceCommandRouter, SpecificationMappingCommandRouter};
use crate::source::EventSourceComponent;
use crate::storage::DefaultEventStorageProcessor;

/// Top-level provisioning component.
pub struct DeviceProvisioning {
    management: Arc<dyn DeviceManagement>,
    dispatcher: Option<Arc<CommandDispatcher>>,
    inbound_chain: Arc<InboundEventProcessorChain>,
    outbound_chain: Arc<OutboundEventProcessorChain>,
    inbound_strategy: Option<Arc<dyn InboundProcessingStrategy>>,
    outbound_strategy: Option<Arc<dyn OutboundProcessingStrategy>>,
    registration_manager: Option<Arc<dyn RegistrationManager>>,
    batch_manager: Option<Arc<dyn BatchOperationManager>>,
    event_sources: Vec<Arc<dyn EventSourceComponent>>,
    state: LifecycleState,
}

fn required<T: ?Sized>(component: &Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
    component
        .clone()
        .ok_or_else(|| Error::Configuration(format!("No {} configured for provisioning", name)))
}

impl DeviceProvisioning {
    /// Empty facade; components are supplied with the `with_*` methods.
    ///
    /// `management` is the API collaborators should store events through,
    /// normally an [`OutboundEventDispatchingManagement`].
    pub fn new(management: Arc<dyn DeviceManagement>) -> Self {
        Self {
            management,
            dispatcher: None,
            inbound_chain: Arc::new(InboundEventProcessorChain::new()),
            outbound_chain: Arc::new(OutboundEventProcessorChain::new()),
            inbound_strategy: None,
            outbound_strategy: None,
            registration_manager: None,
            batch_manager: None,
            event_sources: Vec::new(),
            state: LifecycleState::new(),
        }
    }

    /// Wire the default components from configuration.
    ///
    /// `management` is wrapped so stored events flow to outbound
    /// processing; [`DeviceProvisioning::management`] returns the wrapper.
    pub fn from_config(
        config: ProvisioningConfig,
        management: Arc<dyn DeviceManagement>,
        destinations: Vec<Arc<dyn CommandDestination>>,
    ) -> Result<Self> {
        config.validate()?;
        let context = ExecutionContext::system_as(config.system.principal.clone());

        let outbound_chain = Arc::new(OutboundEventProcessorChain::new());
        let outbound_strategy: Arc<dyn OutboundProcessingStrategy> = Arc::new(
            BlockingQueueOutboundProcessingStrategy::new(config.outbound.clone(), outbound_chain.clone()),
        );
        let management: Arc<dyn DeviceManagement> = Arc::new(OutboundEventDispatchingManagement::new(
            management,
            outbound_strategy.clone(),
        ));

        let router: Arc<dyn OutboundCommandRouter> = match &config.router {
            RouterConfig::SingleChoice => Arc::new(SingleChoiceCommandRouter::new()),
            RouterConfig::SpecificationMapping {
                mappings,
                default_destination,
            } => {
                let mut router = SpecificationMappingCommandRouter::new(mappings.clone());
                if let Some(default) = default_destination {
                    router = router.with_default_destination(default.clone());
                }
                Arc::new(router)
            }
        };
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(DefaultCommandProcessingStrategy::new(management.clone())),
            router,
            destinations,
        ));

        let registration: Arc<dyn RegistrationManager> = Arc::new(DefaultRegistrationManager::new(
            management.clone(),
            dispatcher.clone(),
            config.registration.clone(),
        ));
        let batch: Arc<dyn BatchOperationManager> = Arc::new(DefaultBatchOperationManager::new(
            management.clone(),
            config.batch.clone(),
            context.clone(),
        ));
        outbound_chain.add_processor(Arc::new(ProvisioningEventProcessor::new(
            dispatcher.clone(),
            batch.clone(),
            config.provisioning_processor.clone(),
        )));

        let inbound_chain = Arc::new(InboundEventProcessorChain::new().with_processor(Arc::new(
            DefaultEventStorageProcessor::new(management.clone(), registration.clone()),
        )));
        let inbound_strategy: Arc<dyn InboundProcessingStrategy> = Arc::new(
            BlockingQueueInboundProcessingStrategy::new(config.inbound.clone(), inbound_chain.clone(), context),
        );

        Ok(Self::new(management)
            .with_dispatcher(dispatcher)
            .with_inbound_chain(inbound_chain)
            .with_outbound_chain(outbound_chain)
            .with_inbound_strategy(inbound_strategy)
            .with_outbound_strategy(outbound_strategy)
            .with_registration_manager(registration)
            .with_batch_manager(batch))
    }

    /// Command dispatcher started before the event processors.
    pub fn with_dispatcher(mut self, dispatcher: Arc<CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the default (empty) inbound chain.
    pub fn with_inbound_chain(mut self, chain: Arc<InboundEventProcessorChain>) -> Self {
        self.inbound_chain = chain;
        self
    }

    /// Replace the default outbound chain; it stays gated until `start`.
    pub fn with_outbound_chain(mut self, chain: Arc<OutboundEventProcessorChain>) -> Self {
        self.outbound_chain = chain;
        self
    }

    pub fn with_inbound_strategy(mut self, strategy: Arc<dyn InboundProcessingStrategy>) -> Self {
        self.inbound_strategy = Some(strategy);
        self
    }

    pub fn with_outbound_strategy(mut self, strategy: Arc<dyn OutboundProcessingStrategy>) -> Self {
        self.outbound_strategy = Some(strategy);
        self
    }

    pub fn with_registration_manager(mut self, manager: Arc<dyn RegistrationManager>) -> Self {
        self.registration_manager = Some(manager);
        self
    }

    pub fn with_batch_manager(mut self, manager: Arc<dyn BatchOperationManager>) -> Self {
        self.batch_manager = Some(manager);
        self
    }

    /// Add an event source. Sources without their own strategy get the inbound strategy.
    pub fn with_event_source(mut self, source: Arc<dyn EventSourceComponent>) -> Self {
        self.event_sources.push(source);
        self
    }

    /// Management that collaborators store events through.
    pub fn management(&self) -> &Arc<dyn DeviceManagement> {
        &self.management
    }

    pub fn dispatcher(&self) -> Option<&Arc<CommandDispatcher>> {
        self.dispatcher.as_ref()
    }

    pub fn inbound_chain(&self) -> &Arc<InboundEventProcessorChain> {
        &self.inbound_chain
    }

    pub fn outbound_chain(&self) -> &Arc<OutboundEventProcessorChain> {
        &self.outbound_chain
    }

    pub fn inbound_strategy(&self) -> Option<&Arc<dyn InboundProcessingStrategy>> {
        self.inbound_strategy.as_ref()
    }

    pub fn outbound_strategy(&self) -> Option<&Arc<dyn OutboundProcessingStrategy>> {
        self.outbound_strategy.as_ref()
    }

    pub fn registration_manager(&self) -> Option<&Arc<dyn RegistrationManager>> {
        self.registration_manager.as_ref()
    }

    pub fn batch_manager(&self) -> Option<&Arc<dyn BatchOperationManager>> {
        self.batch_manager.as_ref()
    }

    pub fn event_sources(&self) -> &[Arc<dyn EventSourceComponent>] {
        &self.event_sources
    }

    /// Deliver a stored invocation to its target devices.
    pub async fn deliver_command(&self, invocation: &DeviceCommandInvocation) -> Result<()> {
        required(&self.dispatcher, "command dispatcher")?
            .deliver_command(invocation)
            .await
    }

    /// Deliver a system command to a registered device.
    pub async fn deliver_system_command(&self, hardware_id: &str, command: &SystemCommand) -> Result<()> {
        required(&self.dispatcher, "command dispatcher")?
            .deliver_system_command(hardware_id, command)
            .await
    }

    async fn start_components(&self) -> Result<()> {
        let dispatcher = required(&self.dispatcher, "command dispatcher")?;
        let outbound_strategy = required(&self.outbound_strategy, "outbound processing strategy")?;
        let registration = required(&self.registration_manager, "registration manager")?;
        let batch = required(&self.batch_manager, "batch operation manager")?;
        let inbound_strategy = required(&self.inbound_strategy, "inbound processing strategy")?;

        dispatcher.start().await?;
        self.outbound_chain.set_processing_enabled(false);
        self.outbound_chain.start().await?;
        outbound_strategy.start().await?;
        registration.start().await?;
        batch.start().await?;
        self.inbound_chain.start().await?;
        inbound_strategy.start().await?;
        for source in &self.event_sources {
            source.set_default_strategy(inbound_strategy.clone());
            source.start().await?;
        }
        self.outbound_chain.set_processing_enabled(true);
        Ok(())
    }
}

async fn stop_quietly<C: LifecycleComponent + ?Sized>(component: &C) {
    if let Err(e) = component.stop().await {
        warn!(component = %component.component_name(), error = %e, "Failed to stop component");
    }
}

#[async_trait]
impl LifecycleComponent for DeviceProvisioning {
    fn component_name(&self) -> String {
        "Device provisioning".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        if let Err(e) = self.start_components().await {
            self.state.set(LifecycleStatus::Error);
            return Err(e);
        }
        self.state.set(LifecycleStatus::Started);
        info!(sources = self.event_sources.len(), "Device provisioning started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopping);
        self.outbound_chain.set_processing_enabled(false);
        for source in &self.event_sources {
            stop_quietly(source.as_ref()).await;
        }
        if let Some(strategy) = &self.inbound_strategy {
            stop_quietly(strategy.as_ref()).await;
        }
        stop_quietly(self.inbound_chain.as_ref()).await;
        if let Some(batch) = &self.batch_manager {
            stop_quietly(batch.as_ref()).await;
        }
        if let Some(registration) = &self.registration_manager {
            stop_quietly(registration.as_ref()).await;
        }
        if let Some(strategy) = &self.outbound_strategy {
            stop_quietly(strategy.as_ref()).await;
        }
        stop_quietly(self.outbound_chain.as_ref()).await;
        if let Some(dispatcher) = &self.dispatcher {
            stop_quietly(dispatcher.as_ref()).await;
        }
        self.state.set(LifecycleStatus::Stopped);
        info!("Device provisioning stopped");
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}
