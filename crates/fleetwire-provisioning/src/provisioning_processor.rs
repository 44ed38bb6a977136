//! Outbound processor that turns stored invocations into deliveries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{BatchOperation, DeviceCommandInvocation};
use fleetwire_core::{Error, ExecutionContext, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::batch::BatchOperationManager;
use crate::command::CommandDispatcher;
use crate::config::ProvisioningProcessorConfig;
use crate::processor::OutboundEventProcessor;

/// Delivers command invocations and schedules batch operations.
///
/// Invocations are delivered on background tasks, at most `worker_count`
/// at a time, so slow transports never hold up outbound processing.
pub struct ProvisioningEventProcessor {
    dispatcher: Arc<CommandDispatcher>,
    batch: Arc<dyn BatchOperationManager>,
    config: ProvisioningProcessorConfig,
    permits: Arc<Semaphore>,
    cancel: Mutex<Option<CancellationToken>>,
    state: LifecycleState,
}

impl ProvisioningEventProcessor {
    /// At most `config.worker_count` invocations are delivered concurrently.
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        batch: Arc<dyn BatchOperationManager>,
        config: ProvisioningProcessorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            dispatcher,
            batch,
            config,
            permits,
            cancel: Mutex::new(None),
            state: LifecycleState::new(),
        }
    }
}

#[async_trait]
impl LifecycleComponent for ProvisioningEventProcessor {
    fn component_name(&self) -> String {
        "Provisioning event processor".to_string()
    }

    async fn start(&self) -> Result<()> {
        *self.cancel.lock() = Some(CancellationToken::new());
        self.state.set(LifecycleStatus::Started);
        info!(workers = self.config.worker_count, "Provisioning event processor started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
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
impl OutboundEventProcessor for ProvisioningEventProcessor {
    async fn on_command_invocation(
        &self,
        _ctx: &ExecutionContext,
        invocation: &DeviceCommandInvocation,
    ) -> Result<()> {
        let cancel = self
            .cancel
            .lock()
            .clone()
            .ok_or_else(|| Error::Interrupted("Provisioning event processor is not started".to_string()))?;
        let dispatcher = self.dispatcher.clone();
        let permits = self.permits.clone();
        let invocation = invocation.clone();
        tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            debug!(invocation = %invocation.id, "Delivering command invocation");
            let delivery = AssertUnwindSafe(dispatcher.deliver_command(&invocation)).catch_unwind();
            tokio::select! {
                _ = cancel.cancelled() => {}
                outcome = delivery => match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(invocation = %invocation.id, error = %e, "Error delivering command invocation"),
                    Err(_) => error!(invocation = %invocation.id, "Unhandled panic delivering command invocation"),
                },
            }
        });
        Ok(())
    }

    async fn on_batch_operation(&self, _ctx: &ExecutionContext, operation: &BatchOperation) -> Result<()> {
        debug!(token = %operation.token, "Scheduling batch operation");
        self.batch.process(operation).await
    }
}
