//! Inbound processing strategies.
//!
//! The blocking-queue strategy buffers decoded requests in a bounded queue
//! and fans them out to a fixed pool of worker tasks. Submission waits when
//! the queue is full, so producers slow down instead of losing events.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use fleetwire_core::model::DecodedDeviceEventRequest;
use fleetwire_core::{Error, ExecutionContext, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::InboundConfig;
use crate::processor::{dispatch_inbound, InboundEventProcessor};

/// Accepts decoded requests for processing.
#[async_trait]
pub trait InboundProcessingStrategy: LifecycleComponent {
    /// Queue a request, waiting for space if necessary.
    async fn submit(&self, request: DecodedDeviceEventRequest) -> Result<()>;
}

/// Snapshot of inbound throughput counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundProcessingMetrics {
    /// Requests accepted into the queue
    pub submitted: u64,
    /// Requests taken off the queue and dispatched
    pub processed: u64,
    /// Requests whose processing failed
    pub errors: u64,
    /// Requests currently waiting in the queue
    pub backlog: usize,
    /// Mean time between submit and dequeue
    pub avg_wait_ms: u64,
    /// Mean time spent in the processor
    pub avg_processing_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    total_wait_ms: AtomicU64,
    total_processing_ms: AtomicU64,
    reports: AtomicU64,
}

struct QueuedRequest {
    request: DecodedDeviceEventRequest,
    enqueued_at: Instant,
}

/// Bounded queue plus worker pool.
pub struct BlockingQueueInboundProcessingStrategy {
    config: InboundConfig,
    processor: Arc<dyn InboundEventProcessor>,
    context: ExecutionContext,
    sender: Sender<QueuedRequest>,
    receiver: Receiver<QueuedRequest>,
    counters: Arc<Counters>,
    cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    state: LifecycleState,
}

impl BlockingQueueInboundProcessingStrategy {
    /// Create a strategy dispatching to `processor` (usually the inbound chain).
    ///
    /// The queue exists from construction, so requests submitted before
    /// `start` wait for the workers.
    pub fn new(
        config: InboundConfig,
        processor: Arc<dyn InboundEventProcessor>,
        context: ExecutionContext,
    ) -> Self {
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));
        Self {
            config,
            processor,
            context,
            sender,
            receiver,
            counters: Arc::new(Counters::default()),
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            state: LifecycleState::new(),
        }
    }

    /// Maximum number of queued requests.
    pub fn capacity(&self) -> usize {
        self.config.queue_capacity.max(1)
    }

    /// Queue a request without waiting; fails with `QueueFull` when at capacity.
    pub fn try_submit(&self, request: DecodedDeviceEventRequest) -> Result<()> {
        let queued = QueuedRequest {
            request,
            enqueued_at: Instant::now(),
        };
        match self.sender.try_send(queued) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::QueueFull(self.capacity())),
            Err(TrySendError::Closed(_)) => Err(Error::Interrupted(
                "Inbound processing queue is closed".to_string(),
            )),
        }
    }

    /// Number of status lines the monitor has logged.
    pub fn monitor_reports(&self) -> u64 {
        self.counters.reports.load(Ordering::Relaxed)
    }

    /// Current counters. Errors include failures isolated inside the processor chain.
    pub fn metrics(&self) -> InboundProcessingMetrics {
        snapshot(&self.counters, self.processor.as_ref(), self.receiver.len())
    }
}

fn snapshot(
    counters: &Counters,
    processor: &dyn InboundEventProcessor,
    backlog: usize,
) -> InboundProcessingMetrics {
    let processed = counters.processed.load(Ordering::Relaxed);
    let average = |total: u64| if processed == 0 { 0 } else { total / processed };
    InboundProcessingMetrics {
        submitted: counters.submitted.load(Ordering::Relaxed),
        processed,
        errors: counters.errors.load(Ordering::Relaxed) + processor.isolated_failures(),
        backlog,
        avg_wait_ms: average(counters.total_wait_ms.load(Ordering::Relaxed)),
        avg_processing_ms: average(counters.total_processing_ms.load(Ordering::Relaxed)),
    }
}

async fn run_worker(
    id: usize,
    receiver: Receiver<QueuedRequest>,
    processor: Arc<dyn InboundEventProcessor>,
    context: ExecutionContext,
    counters: Arc<Counters>,
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

        let waited = queued.enqueued_at.elapsed().as_millis() as u64;
        counters.total_wait_ms.fetch_add(waited, Ordering::Relaxed);

        let started = Instant::now();
        let outcome = AssertUnwindSafe(dispatch_inbound(processor.as_ref(), &context, &queued.request))
            .catch_unwind()
            .await;
        counters
            .total_processing_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        counters.processed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker = id,
                    hardware_id = %queued.request.hardware_id,
                    kind = queued.request.request.kind(),
                    error = %e,
                    "Error processing inbound event"
                );
            }
            Err(_) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker = id,
                    hardware_id = %queued.request.hardware_id,
                    "Unhandled panic processing inbound event"
                );
            }
        }
    }
    debug!(worker = id, "Inbound worker stopped");
}

async fn run_monitor(
    counters: Arc<Counters>,
    processor: Arc<dyn InboundEventProcessor>,
    receiver: Receiver<QueuedRequest>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let m = snapshot(&counters, processor.as_ref(), receiver.len());
                info!(
                    "Count({:5}) Errors({:5}) Backlog({:5}) AvgWait({:5} ms) AvgProc({:5} ms)",
                    m.submitted, m.errors, m.backlog, m.avg_wait_ms, m.avg_processing_ms
                );
                counters.reports.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait]
impl LifecycleComponent for BlockingQueueInboundProcessingStrategy {
    fn component_name(&self) -> String {
        "Blocking queue inbound processing strategy".to_string()
    }

    async fn start(&self) -> Result<()> {
        if self.sender.is_closed() {
            return Err(Error::Configuration(
                "Inbound processing strategy can not be restarted after stop".to_string(),
            ));
        }
        if self.state.is_started() {
            return Ok(());
        }
        self.state.set(LifecycleStatus::Starting);

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(self.config.worker_count + 1);
        for id in 0..self.config.worker_count {
            tasks.push(tokio::spawn(run_worker(
                id,
                self.receiver.clone(),
                self.processor.clone(),
                self.context.clone(),
                self.counters.clone(),
                cancel.child_token(),
            )));
        }
        if self.config.enable_monitoring {
            tasks.push(tokio::spawn(run_monitor(
                self.counters.clone(),
                self.processor.clone(),
                self.receiver.clone(),
                self.config.monitoring_interval(),
                cancel.child_token(),
            )));
        }

        *self.cancel.lock() = Some(cancel);
        *self.tasks.lock() = tasks;
        self.state.set(LifecycleStatus::Started);
        info!(
            workers = self.config.worker_count,
            capacity = self.capacity(),
            monitoring = self.config.enable_monitoring,
            "Inbound processing strategy started"
        );
        Ok(())
    }

    /// Stops accepting requests and cancels workers; queued items are dropped.
    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopping);
        self.sender.close();
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.state.set(LifecycleStatus::Stopped);
        info!("Inbound processing strategy stopped");
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl InboundProcessingStrategy for BlockingQueueInboundProcessingStrategy {
    async fn submit(&self, request: DecodedDeviceEventRequest) -> Result<()> {
        let queued = QueuedRequest {
            request,
            enqueued_at: Instant::now(),
        };
        self.sender
            .send(queued)
            .await
            .map_err(|_| Error::Interrupted("Inbound processing queue is closed".to_string()))?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
