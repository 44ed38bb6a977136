//! Ordered processor chains.
//!
//! A chain invokes every processor in list order. A processor that fails
//! (or panics) is logged, counted and skipped; the chain always finishes
//! the list and never reports the failure to its caller. The count is
//! exposed through `isolated_failures` for the queue strategies' metrics.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{
    AlertCreateRequest, BatchOperation, CommandResponseCreateRequest, DeviceAlert,
    DeviceCommandInvocation, DeviceCommandResponse, DeviceLocation, DeviceMeasurements,
    LocationCreateRequest, MeasurementsCreateRequest, RegistrationRequest,
};
use fleetwire_core::{ExecutionContext, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::processor::{InboundEventProcessor, OutboundEventProcessor};

/// Run `$call` for each processor in `$list`, isolating and counting failures.
macro_rules! dispatch_each {
    ($list:expr, $failures:expr, $direction:literal, $kind:literal, |$p:ident| $call:expr) => {{
        for $p in $list {
            match AssertUnwindSafe($call).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    $failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        direction = $direction,
                        processor = %$p.component_name(),
                        kind = $kind,
                        error = %e,
                        "Event processor failed"
                    );
                }
                Err(_) => {
                    $failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        direction = $direction,
                        processor = %$p.component_name(),
                        kind = $kind,
                        "Event processor panicked"
                    );
                }
            }
        }
        Ok(())
    }};
}

/// Start each processor in order, failing on the first error.
async fn start_all<P>(processors: &[Arc<P>]) -> Result<()>
where
    P: LifecycleComponent + ?Sized,
{
    for processor in processors {
        processor.start().await?;
        info!(processor = %processor.component_name(), "Started event processor");
    }
    Ok(())
}

/// Stop each processor, logging failures.
async fn stop_all<P>(processors: &[Arc<P>])
where
    P: LifecycleComponent + ?Sized,
{
    for processor in processors {
        if let Err(e) = processor.stop().await {
            warn!(processor = %processor.component_name(), error = %e, "Failed to stop event processor");
        }
    }
}

/// Chain of inbound event processors.
#[derive(Default)]
pub struct InboundEventProcessorChain {
    processors: RwLock<Vec<Arc<dyn InboundEventProcessor>>>,
    failures: AtomicU64,
    state: LifecycleState,
}

impl InboundEventProcessorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_processor`](Self::add_processor).
    pub fn with_processor(self, processor: Arc<dyn InboundEventProcessor>) -> Self {
        self.add_processor(processor);
        self
    }

    /// Append a processor; it runs after every processor already in the chain.
    ///
    /// Processors added after `start` are not started by the chain.
    pub fn add_processor(&self, processor: Arc<dyn InboundEventProcessor>) {
        self.processors.write().push(processor);
    }

    /// Snapshot of the current processor list.
    pub fn processors(&self) -> Vec<Arc<dyn InboundEventProcessor>> {
        self.processors.read().clone()
    }

    /// Number of processors in the chain.
    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    /// True when no processors have been added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LifecycleComponent for InboundEventProcessorChain {
    fn component_name(&self) -> String {
        "Inbound event processor chain".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        if let Err(e) = start_all(&self.processors()).await {
            self.state.set(LifecycleStatus::Error);
            return Err(e);
        }
        self.state.set(LifecycleStatus::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopping);
        stop_all(&self.processors()).await;
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl InboundEventProcessor for InboundEventProcessorChain {
    async fn on_registration_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &RegistrationRequest,
    ) -> Result<()> {
        dispatch_each!(self.processors(), self.failures, "inbound", "registration", |p| p
            .on_registration_request(ctx, hardware_id, originator, request))
    }

    async fn on_command_response_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &CommandResponseCreateRequest,
    ) -> Result<()> {
        dispatch_each!(self.processors(), self.failures, "inbound", "command_response", |p| p
            .on_command_response_request(ctx, hardware_id, originator, request))
    }

    async fn on_measurements_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &MeasurementsCreateRequest,
    ) -> Result<()> {
        dispatch_each!(self.processors(), self.failures, "inbound", "measurements", |p| p
            .on_measurements_request(ctx, hardware_id, originator, request))
    }

    async fn on_location_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &LocationCreateRequest,
    ) -> Result<()> {
        dispatch_each!(self.processors(), self.failures, "inbound", "location", |p| p
            .on_location_request(ctx, hardware_id, originator, request))
    }

    async fn on_alert_request(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        originator: Option<&str>,
        request: &AlertCreateRequest,
    ) -> Result<()> {
        dispatch_each!(self.processors(), self.failures, "inbound", "alert", |p| p
            .on_alert_request(ctx, hardware_id, originator, request))
    }

    fn isolated_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Chain of outbound event processors, gated by an enable flag.
///
/// Processing starts disabled; the owner enables it once the rest of the
/// pipeline is up. Processors that are not started are skipped.
#[derive(Default)]
pub struct OutboundEventProcessorChain {
    processors: RwLock<Vec<Arc<dyn OutboundEventProcessor>>>,
    processing_enabled: AtomicBool,
    failures: AtomicU64,
    state: LifecycleState,
}

impl OutboundEventProcessorChain {
    /// Create an empty chain with processing disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_processor`](Self::add_processor).
    pub fn with_processor(self, processor: Arc<dyn OutboundEventProcessor>) -> Self {
        self.add_processor(processor);
        self
    }

    /// Append a processor. One added after `start` stays unstarted and is skipped.
    pub fn add_processor(&self, processor: Arc<dyn OutboundEventProcessor>) {
        self.processors.write().push(processor);
    }

    /// Snapshot of the current processor list.
    pub fn processors(&self) -> Vec<Arc<dyn OutboundEventProcessor>> {
        self.processors.read().clone()
    }

    /// Number of processors in the chain.
    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    /// True when no processors have been added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open or close the dispatch gate.
    pub fn set_processing_enabled(&self, enabled: bool) {
        self.processing_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Outbound event processing toggled");
    }

    /// Whether dispatch currently reaches the processors.
    pub fn is_processing_enabled(&self) -> bool {
        self.processing_enabled.load(Ordering::SeqCst)
    }

    /// Processors eligible for dispatch; empty while processing is disabled.
    fn active(&self) -> Vec<Arc<dyn OutboundEventProcessor>> {
        if !self.is_processing_enabled() {
            return Vec::new();
        }
        self.processors()
            .into_iter()
            .filter(|p| {
                let started = p.lifecycle_status() == LifecycleStatus::Started;
                if !started {
                    warn!(processor = %p.component_name(), "Skipping outbound event processor that is not started");
                }
                started
            })
            .collect()
    }
}

#[async_trait]
impl LifecycleComponent for OutboundEventProcessorChain {
    fn component_name(&self) -> String {
        "Outbound event processor chain".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        if let Err(e) = start_all(&self.processors()).await {
            self.state.set(LifecycleStatus::Error);
            return Err(e);
        }
        self.state.set(LifecycleStatus::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopping);
        stop_all(&self.processors()).await;
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl OutboundEventProcessor for OutboundEventProcessorChain {
    async fn on_measurements(&self, ctx: &ExecutionContext, event: &DeviceMeasurements) -> Result<()> {
        dispatch_each!(self.active(), self.failures, "outbound", "measurements", |p| p.on_measurements(ctx, event))
    }

    async fn on_location(&self, ctx: &ExecutionContext, event: &DeviceLocation) -> Result<()> {
        dispatch_each!(self.active(), self.failures, "outbound", "location", |p| p.on_location(ctx, event))
    }

    async fn on_alert(&self, ctx: &ExecutionContext, event: &DeviceAlert) -> Result<()> {
        dispatch_each!(self.active(), self.failures, "outbound", "alert", |p| p.on_alert(ctx, event))
    }

    async fn on_command_invocation(
        &self,
        ctx: &ExecutionContext,
        invocation: &DeviceCommandInvocation,
    ) -> Result<()> {
        dispatch_each!(self.active(), self.failures, "outbound", "command_invocation", |p| p
            .on_command_invocation(ctx, invocation))
    }

    async fn on_command_response(
        &self,
        ctx: &ExecutionContext,
        response: &DeviceCommandResponse,
    ) -> Result<()> {
        dispatch_each!(self.active(), self.failures, "outbound", "command_response", |p| p
            .on_command_response(ctx, response))
    }

    async fn on_batch_operation(&self, ctx: &ExecutionContext, operation: &BatchOperation) -> Result<()> {
        dispatch_each!(self.active(), self.failures, "outbound", "batch_operation", |p| p
            .on_batch_operation(ctx, operation))
    }

    fn isolated_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
