//! Batch operation processing.
//!
//! A batch operation applies one action to a list of devices. Each element
//! is processed in turn and its outcome recorded; the operation finishes
//! with errors if any element failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwire_core::model::{
    BatchElement, BatchOperation, BatchOperationStatus, BatchOperationType, CommandInitiator,
    CommandTarget, ElementProcessingStatus, META_BATCH_OPERATION_ID, META_INVOCATION_EVENT_ID,
    PARAM_COMMAND_TOKEN,
};
use fleetwire_core::{
    DeviceCommandInvocationCreateRequest, DeviceManagement, Error, ExecutionContext,
    LifecycleComponent, LifecycleState, LifecycleStatus, Result,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BatchConfig;

/// Accepts batch operations for processing.
#[async_trait]
pub trait BatchOperationManager: LifecycleComponent {
    /// Schedule an operation; returns once it is queued.
    async fn process(&self, operation: &BatchOperation) -> Result<()>;
}

struct BatchExecutor {
    management: Arc<dyn DeviceManagement>,
    context: ExecutionContext,
    throttle: Duration,
}

impl BatchExecutor {
    async fn execute(&self, operation: &BatchOperation) -> Result<BatchOperation> {
        debug!(token = %operation.token, "Processing batch operation");
        self.management
            .update_batch_operation(&operation.token, BatchOperationStatus::Processing)
            .await?;

        let elements = self.management.list_batch_elements(&operation.token).await?;
        let mut failed = 0usize;
        for element in elements {
            if element.processing_status != ElementProcessingStatus::Unprocessed {
                continue;
            }
            if !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
            let updated = self.process_element(operation, &element).await?;
            match updated.processing_status {
                ElementProcessingStatus::Succeeded => {}
                ElementProcessingStatus::Failed => failed += 1,
                other => warn!(status = ?other, "Batch element was not in an expected state"),
            }
        }

        let status = if failed > 0 {
            BatchOperationStatus::FinishedWithErrors
        } else {
            BatchOperationStatus::FinishedSuccessfully
        };
        info!(token = %operation.token, ?status, failed, "Finished batch operation");
        self.management
            .update_batch_operation(&operation.token, status)
            .await
    }

    async fn process_element(&self, operation: &BatchOperation, element: &BatchElement) -> Result<BatchElement> {
        self.management
            .update_batch_element(
                &element.batch_operation_token,
                element.index,
                ElementProcessingStatus::Processing,
                HashMap::new(),
            )
            .await?;

        let outcome = match operation.operation_type {
            BatchOperationType::InvokeCommand => self.invoke_command(operation, element).await,
            BatchOperationType::UpdateFirmware => Err(Error::Configuration(
                "Firmware update batch operations are not supported".to_string(),
            )),
        };
        let (status, metadata) = match outcome {
            Ok(metadata) => (ElementProcessingStatus::Succeeded, metadata),
            Err(e) => {
                warn!(
                    token = %operation.token,
                    hardware_id = %element.hardware_id,
                    error = %e,
                    "Batch element failed"
                );
                (ElementProcessingStatus::Failed, HashMap::new())
            }
        };
        self.management
            .update_batch_element(&element.batch_operation_token, element.index, status, metadata)
            .await
    }

    async fn invoke_command(
        &self,
        operation: &BatchOperation,
        element: &BatchElement,
    ) -> Result<HashMap<String, String>> {
        let command_token = operation
            .parameters
            .get(PARAM_COMMAND_TOKEN)
            .ok_or_else(|| Error::RequiredParameterMissing(PARAM_COMMAND_TOKEN.to_string()))?;
        let command = self
            .management
            .get_device_command_by_token(command_token)
            .await?
            .ok_or_else(|| Error::CommandNotFound(command_token.clone()))?;
        let device = self
            .management
            .get_device_by_hardware_id(&element.hardware_id)
            .await?
            .ok_or_else(|| Error::InvalidHardwareId(element.hardware_id.clone()))?;
        let assignment = self
            .management
            .get_current_device_assignment(&device)
            .await?
            .ok_or_else(|| Error::DeviceNotAssigned(device.hardware_id.clone()))?;

        let request = DeviceCommandInvocationCreateRequest {
            command_token: command_token.clone(),
            initiator: CommandInitiator::BatchOperation,
            initiator_id: Some(self.context.principal().to_string()),
            target: CommandTarget::Assignment,
            target_id: assignment.token.clone(),
            parameter_values: operation.metadata.clone(),
            status: None,
            metadata: HashMap::from([(
                META_BATCH_OPERATION_ID.to_string(),
                operation.token.clone(),
            )]),
        };
        let invocation = self
            .management
            .add_device_command_invocation(&self.context, &assignment.token, &command, request)
            .await?;
        info!(hardware_id = %device.hardware_id, invocation = %invocation.id, "Batch command invoked");
        Ok(HashMap::from([(
            META_INVOCATION_EVENT_ID.to_string(),
            invocation.id,
        )]))
    }
}

/// Runs batch operations on background tasks, bounded by a worker count.
pub struct DefaultBatchOperationManager {
    executor: Arc<BatchExecutor>,
    permits: Arc<Semaphore>,
    cancel: Mutex<Option<CancellationToken>>,
    state: LifecycleState,
}

impl DefaultBatchOperationManager {
    /// Element invocations are created under `context`.
    pub fn new(management: Arc<dyn DeviceManagement>, config: BatchConfig, context: ExecutionContext) -> Self {
        Self {
            executor: Arc::new(BatchExecutor {
                management,
                context,
                throttle: Duration::from_millis(config.throttle_delay_ms),
            }),
            permits: Arc::new(Semaphore::new(config.worker_count.max(1))),
            cancel: Mutex::new(None),
            state: LifecycleState::new(),
        }
    }

    /// Process an operation on the calling task and return its final state.
    pub async fn execute(&self, operation: &BatchOperation) -> Result<BatchOperation> {
        self.executor.execute(operation).await
    }
}

#[async_trait]
impl LifecycleComponent for DefaultBatchOperationManager {
    fn component_name(&self) -> String {
        "Default batch operation manager".to_string()
    }

    async fn start(&self) -> Result<()> {
        *self.cancel.lock() = Some(CancellationToken::new());
        self.state.set(LifecycleStatus::Started);
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
impl BatchOperationManager for DefaultBatchOperationManager {
    async fn process(&self, operation: &BatchOperation) -> Result<()> {
        let cancel = self
            .cancel
            .lock()
            .clone()
            .ok_or_else(|| Error::Interrupted("Batch operation manager is not started".to_string()))?;
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        let operation = operation.clone();
        tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(token = %operation.token, "Batch operation interrupted");
                }
                result = executor.execute(&operation) => {
                    if let Err(e) = result {
                        error!(token = %operation.token, error = %e, "Error processing batch operation");
                    }
                }
            }
        });
        Ok(())
    }
}
