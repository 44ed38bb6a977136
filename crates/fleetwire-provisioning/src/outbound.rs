//! Outbound processing strategies and the management decorator feeding them.
//!
//! Events stored through [`OutboundEventDispatchingManagement`] are handed
//! to an [`OutboundProcessingStrategy`], which forwards them to the outbound
//! processor chain either from a worker pool or inline.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use fleetwire_core::model::{
    AlertCreateRequest, BatchElement, BatchOperation, BatchOperationStatus,
    CommandResponseCreateRequest, Device, DeviceAlert, DeviceAssignment, DeviceCommand,
    DeviceCommandInvocation, DeviceCommandResponse, DeviceLocation, DeviceMeasurements,
    DeviceSpecification, ElementProcessingStatus, LocationCreateRequest,
    MeasurementsCreateRequest, OutboundEvent, Site,
};
use fleetwire_core::{
    BatchOperationCreateRequest, DeviceAssignmentCreateRequest, DeviceCommandCreateRequest,
    DeviceCommandInvocationCreateRequest, DeviceCreateRequest, DeviceManagement,
    DeviceSpecificationCreateRequest, Error, ExecutionContext, LifecycleComponent,
    LifecycleState, LifecycleStatus, Result, SiteCreateRequest,
};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::OutboundConfig;
use crate::processor::{dispatch_outbound, OutboundEventProcessor};

/// Hands stored events to outbound processing.
#[async_trait]
pub trait OutboundProcessingStrategy: LifecycleComponent {
    async fn process(&self, ctx: &ExecutionContext, event: OutboundEvent) -> Result<()>;
}

async fn dispatch_isolated(
    processor: &dyn OutboundEventProcessor,
    ctx: &ExecutionContext,
    event: &OutboundEvent,
) {
    match AssertUnwindSafe(dispatch_outbound(processor, ctx, event))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(kind = event.kind(), error = %e, "Error processing outbound event"),
        Err(_) => error!(kind = event.kind(), "Unhandled panic processing outbound event"),
    }
}

struct QueuedEvent {
    context: ExecutionContext,
    event: OutboundEvent,
}

/// Bounded queue plus worker pool feeding the outbound processor.
pub struct BlockingQueueOutboundProcessingStrategy {
    config: OutboundConfig,
    processor: Arc<dyn OutboundEventProcessor>,
    sender: Sender<QueuedEvent>,
    receiver: Receiver<QueuedEvent>,
    cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    state: LifecycleState,
}

impl BlockingQueueOutboundProcessingStrategy {
    /// Creates the strategy with a queue of `config.queue_capacity` events.
    /// Workers are spawned on `start`.
    pub fn new(config: OutboundConfig, processor: Arc<dyn OutboundEventProcessor>) -> Self {
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));
        Self {
            config,
            processor,
            sender,
            receiver,
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            state: LifecycleState::new(),
        }
    }

    /// Events waiting for a worker.
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }
}

async fn run_outbound_worker(
    id: usize,
    receiver: Receiver<QueuedEvent>,
    processor: Arc<dyn OutboundEventProcessor>,
    cancel: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            _ = cancel.cancelled() => break,
            item = receiver.recv() => match item {
                Ok(item) => item,
                Err(_) => break,
            },
        };
        dispatch_isolated(processor.as_ref(), &queued.context, &queued.event).await;
    }
    debug!(worker = id, "Outbound worker stopped");
}

#[async_trait]
impl LifecycleComponent for BlockingQueueOutboundProcessingStrategy {
    fn component_name(&self) -> String {
        "Blocking queue outbound processing strategy".to_string()
    }

    async fn start(&self) -> Result<()> {
        if self.sender.is_closed() {
            return Err(Error::Configuration(
                "Outbound processing strategy can not be restarted after stop".to_string(),
            ));
        }
        if self.state.is_started() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let tasks = (0..self.config.worker_count)
            .map(|id| {
                tokio::spawn(run_outbound_worker(
                    id,
                    self.receiver.clone(),
                    self.processor.clone(),
                    cancel.child_token(),
                ))
            })
            .collect();
        *self.cancel.lock() = Some(cancel);
        *self.tasks.lock() = tasks;
        self.state.set(LifecycleStatus::Started);
        info!(
            workers = self.config.worker_count,
            capacity = self.config.queue_capacity,
            "Outbound processing strategy started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.sender.close();
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        for task in std::mem::take(&mut *self.tasks.lock()) {
            task.abort();
        }
        self.state.set(LifecycleStatus::Stopped);
        info!("Outbound processing strategy stopped");
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl OutboundProcessingStrategy for BlockingQueueOutboundProcessingStrategy {
    async fn process(&self, ctx: &ExecutionContext, event: OutboundEvent) -> Result<()> {
        self.sender
            .send(QueuedEvent {
                context: ctx.clone(),
                event,
            })
            .await
            .map_err(|_| Error::Interrupted("Outbound processing queue is closed".to_string()))
    }
}

/// Dispatches on the caller's task.
pub struct DirectOutboundProcessingStrategy {
    processor: Arc<dyn OutboundEventProcessor>,
}

impl DirectOutboundProcessingStrategy {
    pub fn new(processor: Arc<dyn OutboundEventProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl LifecycleComponent for DirectOutboundProcessingStrategy {
    fn component_name(&self) -> String {
        "Direct outbound processing strategy".to_string()
    }
}

#[async_trait]
impl OutboundProcessingStrategy for DirectOutboundProcessingStrategy {
    async fn process(&self, ctx: &ExecutionContext, event: OutboundEvent) -> Result<()> {
        dispatch_isolated(self.processor.as_ref(), ctx, &event).await;
        Ok(())
    }
}

/// [`DeviceManagement`] wrapper that forwards stored events to outbound processing.
///
/// Storage results are returned even when forwarding fails; the failure
/// is logged.
pub struct OutboundEventDispatchingManagement {
    inner: Arc<dyn DeviceManagement>,
    strategy: Arc<dyn OutboundProcessingStrategy>,
}

impl OutboundEventDispatchingManagement {
    /// Wraps `inner` so every stored event is also handed to `strategy`.
    pub fn new(inner: Arc<dyn DeviceManagement>, strategy: Arc<dyn OutboundProcessingStrategy>) -> Self {
        Self { inner, strategy }
    }

    /// The wrapped management backend.
    pub fn inner(&self) -> &Arc<dyn DeviceManagement> {
        &self.inner
    }

    async fn forward(&self, ctx: &ExecutionContext, event: OutboundEvent) {
        let kind = event.kind();
        if let Err(e) = self.strategy.process(ctx, event).await {
            error!(kind, error = %e, "Failed to forward stored event to outbound processing");
        }
    }
}

#[async_trait]
impl DeviceManagement for OutboundEventDispatchingManagement {
    async fn create_site(&self, ctx: &ExecutionContext, request: SiteCreateRequest) -> Result<Site> {
        self.inner.create_site(ctx, request).await
    }

    async fn get_site_by_token(&self, token: &str) -> Result<Option<Site>> {
        self.inner.get_site_by_token(token).await
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        self.inner.list_sites().await
    }

    async fn create_device_specification(
        &self,
        ctx: &ExecutionContext,
        request: DeviceSpecificationCreateRequest,
    ) -> Result<DeviceSpecification> {
        self.inner.create_device_specification(ctx, request).await
    }

    async fn get_device_specification_by_token(
        &self,
        token: &str,
    ) -> Result<Option<DeviceSpecification>> {
        self.inner.get_device_specification_by_token(token).await
    }

    async fn create_device(&self, ctx: &ExecutionContext, request: DeviceCreateRequest) -> Result<Device> {
        self.inner.create_device(ctx, request).await
    }

    async fn get_device_by_hardware_id(&self, hardware_id: &str) -> Result<Option<Device>> {
        self.inner.get_device_by_hardware_id(hardware_id).await
    }

    async fn create_device_assignment(
        &self,
        ctx: &ExecutionContext,
        request: DeviceAssignmentCreateRequest,
    ) -> Result<DeviceAssignment> {
        self.inner.create_device_assignment(ctx, request).await
    }

    async fn get_device_assignment_by_token(&self, token: &str) -> Result<Option<DeviceAssignment>> {
        self.inner.get_device_assignment_by_token(token).await
    }

    async fn get_current_device_assignment(&self, device: &Device) -> Result<Option<DeviceAssignment>> {
        self.inner.get_current_device_assignment(device).await
    }

    async fn get_device_for_assignment(&self, assignment: &DeviceAssignment) -> Result<Option<Device>> {
        self.inner.get_device_for_assignment(assignment).await
    }

    async fn release_device_assignment(
        &self,
        ctx: &ExecutionContext,
        token: &str,
    ) -> Result<DeviceAssignment> {
        self.inner.release_device_assignment(ctx, token).await
    }

    async fn create_device_command(
        &self,
        ctx: &ExecutionContext,
        specification_token: &str,
        request: DeviceCommandCreateRequest,
    ) -> Result<DeviceCommand> {
        self.inner
            .create_device_command(ctx, specification_token, request)
            .await
    }

    async fn get_device_command_by_token(&self, token: &str) -> Result<Option<DeviceCommand>> {
        self.inner.get_device_command_by_token(token).await
    }

    async fn add_device_measurements(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &MeasurementsCreateRequest,
    ) -> Result<DeviceMeasurements> {
        let stored = self
            .inner
            .add_device_measurements(ctx, assignment_token, request)
            .await?;
        self.forward(ctx, OutboundEvent::Measurements(stored.clone())).await;
        Ok(stored)
    }

    async fn add_device_location(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &LocationCreateRequest,
    ) -> Result<DeviceLocation> {
        let stored = self
            .inner
            .add_device_location(ctx, assignment_token, request)
            .await?;
        self.forward(ctx, OutboundEvent::Location(stored.clone())).await;
        Ok(stored)
    }

    async fn add_device_alert(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &AlertCreateRequest,
    ) -> Result<DeviceAlert> {
        let stored = self
            .inner
            .add_device_alert(ctx, assignment_token, request)
            .await?;
        self.forward(ctx, OutboundEvent::Alert(stored.clone())).await;
        Ok(stored)
    }

    async fn add_device_command_response(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        request: &CommandResponseCreateRequest,
    ) -> Result<DeviceCommandResponse> {
        let stored = self
            .inner
            .add_device_command_response(ctx, assignment_token, request)
            .await?;
        self.forward(ctx, OutboundEvent::CommandResponse(stored.clone())).await;
        Ok(stored)
    }

    async fn add_device_command_invocation(
        &self,
        ctx: &ExecutionContext,
        assignment_token: &str,
        command: &DeviceCommand,
        request: DeviceCommandInvocationCreateRequest,
    ) -> Result<DeviceCommandInvocation> {
        let stored = self
            .inner
            .add_device_command_invocation(ctx, assignment_token, command, request)
            .await?;
        self.forward(ctx, OutboundEvent::CommandInvocation(stored.clone())).await;
        Ok(stored)
    }

    async fn create_batch_operation(
        &self,
        ctx: &ExecutionContext,
        request: BatchOperationCreateRequest,
    ) -> Result<BatchOperation> {
        let stored = self.inner.create_batch_operation(ctx, request).await?;
        self.forward(ctx, OutboundEvent::BatchOperation(stored.clone())).await;
        Ok(stored)
    }

    async fn get_batch_operation(&self, token: &str) -> Result<Option<BatchOperation>> {
        self.inner.get_batch_operation(token).await
    }

    async fn list_batch_elements(&self, token: &str) -> Result<Vec<BatchElement>> {
        self.inner.list_batch_elements(token).await
    }

    async fn update_batch_operation(
        &self,
        token: &str,
        status: BatchOperationStatus,
    ) -> Result<BatchOperation> {
        self.inner.update_batch_operation(token, status).await
    }

    async fn update_batch_element(
        &self,
        token: &str,
        index: usize,
        status: ElementProcessingStatus,
        metadata: HashMap<String, String>,
    ) -> Result<BatchElement> {
        self.inner
            .update_batch_element(token, index, status, metadata)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_core::model::DeviceEventInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProcessor {
        measurements: AtomicUsize,
    }

    #[async_trait]
    impl LifecycleComponent for CountingProcessor {
        fn component_name(&self) -> String {
            "counting".to_string()
        }
    }

    #[async_trait]
    impl OutboundEventProcessor for CountingProcessor {
        async fn on_measurements(&self, _ctx: &ExecutionContext, _event: &DeviceMeasurements) -> Result<()> {
            self.measurements.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn measurements() -> OutboundEvent {
        OutboundEvent::Measurements(DeviceMeasurements {
            info: DeviceEventInfo {
                id: "evt-1".to_string(),
                assignment_token: "a-1".to_string(),
                site_token: "site".to_string(),
                device_hardware_id: "hw-1".to_string(),
                event_date: chrono::Utc::now(),
                received_date: chrono::Utc::now(),
                metadata: HashMap::new(),
            },
            measurements: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_direct_strategy_dispatches_inline() {
        let processor = Arc::new(CountingProcessor::default());
        let strategy = DirectOutboundProcessingStrategy::new(processor.clone());
        strategy
            .process(&ExecutionContext::system(), measurements())
            .await
            .unwrap();
        assert_eq!(processor.measurements.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blocking_queue_strategy_rejects_after_stop() {
        let processor = Arc::new(CountingProcessor::default());
        let strategy = BlockingQueueOutboundProcessingStrategy::new(OutboundConfig::default(), processor);
        strategy.start().await.unwrap();
        strategy.stop().await.unwrap();

        let result = strategy.process(&ExecutionContext::system(), measurements()).await;
        assert!(matches!(result, Err(Error::Interrupted(_))));
        assert!(strategy.start().await.is_err());
    }
}
