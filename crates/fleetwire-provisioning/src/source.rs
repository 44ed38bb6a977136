//! Inbound event sources.
//!
//! A source ties one or more receivers (transports producing encoded
//! payloads) to a decoder and the inbound processing strategy. Payloads
//! that fail to decode are logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::{Error, LifecycleComponent, LifecycleState, LifecycleStatus, Result};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decoder::{DeviceEventDecoder, EventContext};
use crate::inbound::InboundProcessingStrategy;

/// Context key naming the receiver a payload arrived on.
pub const CONTEXT_RECEIVER: &str = "receiver";

/// Accepts encoded payloads from receivers.
#[async_trait]
pub trait EncodedEventSink<T>: Send + Sync {
    async fn on_encoded_event_received(&self, payload: T, context: EventContext);
}

/// Transport that produces encoded payloads.
#[async_trait]
pub trait InboundEventReceiver<T>: Send + Sync {
    fn receiver_name(&self) -> String;

    /// Begin forwarding payloads to `sink`.
    async fn start(&self, sink: Arc<dyn EncodedEventSink<T>>) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Type-erased view of a source, used by the facade.
pub trait EventSourceComponent: LifecycleComponent {
    fn source_id(&self) -> &str;

    /// Use `strategy` unless the source was built with its own.
    fn set_default_strategy(&self, strategy: Arc<dyn InboundProcessingStrategy>);
}

struct DecodingSink<T> {
    source_id: String,
    update_assignment_state: bool,
    decoder: Arc<dyn DeviceEventDecoder<T>>,
    strategy: Arc<dyn InboundProcessingStrategy>,
}

#[async_trait]
impl<T> EncodedEventSink<T> for DecodingSink<T>
where
    T: Send + Sync + 'static,
{
    async fn on_encoded_event_received(&self, payload: T, context: EventContext) {
        let decoded = match self.decoder.decode(&payload, &context) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(source = %self.source_id, error = %e, "Unable to decode event payload");
                return;
            }
        };
        debug!(source = %self.source_id, count = decoded.len(), "Decoded event payload");
        for mut request in decoded {
            request.request.set_update_state(self.update_assignment_state);
            let hardware_id = request.hardware_id.clone();
            if let Err(e) = self.strategy.submit(request).await {
                error!(source = %self.source_id, hardware_id = %hardware_id, error = %e, "Failed to submit decoded event");
            }
        }
    }
}

/// Receivers plus a decoder feeding the inbound strategy.
pub struct InboundEventSource<T> {
    source_id: String,
    update_assignment_state: bool,
    decoder: Arc<dyn DeviceEventDecoder<T>>,
    receivers: Vec<Arc<dyn InboundEventReceiver<T>>>,
    strategy: RwLock<Option<Arc<dyn InboundProcessingStrategy>>>,
    state: LifecycleState,
}

impl<T> InboundEventSource<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(source_id: impl Into<String>, decoder: Arc<dyn DeviceEventDecoder<T>>) -> Self {
        Self {
            source_id: source_id.into(),
            update_assignment_state: false,
            decoder,
            receivers: Vec::new(),
            strategy: RwLock::new(None),
            state: LifecycleState::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: Arc<dyn InboundEventReceiver<T>>) -> Self {
        self.receivers.push(receiver);
        self
    }

    /// Mark decoded requests so storage also updates the assignment state.
    pub fn with_update_assignment_state(mut self, update: bool) -> Self {
        self.update_assignment_state = update;
        self
    }

    /// Use `strategy` instead of the one supplied by the facade at wiring time.
    pub fn with_strategy(self, strategy: Arc<dyn InboundProcessingStrategy>) -> Self {
        *self.strategy.write() = Some(strategy);
        self
    }

    pub fn receivers(&self) -> &[Arc<dyn InboundEventReceiver<T>>] {
        &self.receivers
    }
}

#[async_trait]
impl<T> LifecycleComponent for InboundEventSource<T>
where
    T: Send + Sync + 'static,
{
    fn component_name(&self) -> String {
        format!("Event source ({})", self.source_id)
    }

    async fn start(&self) -> Result<()> {
        if self.receivers.is_empty() {
            return Err(Error::Configuration(format!(
                "No inbound event receivers registered for event source {}",
                self.source_id
            )));
        }
        let strategy = self.strategy.read().clone().ok_or_else(|| {
            Error::Configuration(format!(
                "No inbound processing strategy for event source {}",
                self.source_id
            ))
        })?;
        self.state.set(LifecycleStatus::Starting);

        let sink: Arc<dyn EncodedEventSink<T>> = Arc::new(DecodingSink {
            source_id: self.source_id.clone(),
            update_assignment_state: self.update_assignment_state,
            decoder: self.decoder.clone(),
            strategy,
        });
        for receiver in &self.receivers {
            if let Err(e) = receiver.start(sink.clone()).await {
                self.state.set(LifecycleStatus::Error);
                return Err(e);
            }
            debug!(source = %self.source_id, receiver = %receiver.receiver_name(), "Started event receiver");
        }
        self.state.set(LifecycleStatus::Started);
        info!(source = %self.source_id, receivers = self.receivers.len(), "Started event source");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        for receiver in &self.receivers {
            if let Err(e) = receiver.stop().await {
                warn!(source = %self.source_id, receiver = %receiver.receiver_name(), error = %e, "Failed to stop event receiver");
            }
        }
        self.state.set(LifecycleStatus::Stopped);
        info!(source = %self.source_id, "Stopped event source");
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

impl<T> EventSourceComponent for InboundEventSource<T>
where
    T: Send + Sync + 'static,
{
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn set_default_strategy(&self, strategy: Arc<dyn InboundProcessingStrategy>) {
        let mut current = self.strategy.write();
        if current.is_none() {
            *current = Some(strategy);
        }
    }
}

/// In-process receiver fed through a tokio mpsc channel.
pub struct ChannelEventReceiver<T> {
    name: String,
    receiver: Mutex<Option<mpsc::Receiver<T>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl<T> ChannelEventReceiver<T>
where
    T: Send + Sync + 'static,
{
    /// Create a receiver and the sender that feeds it.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Sender<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let receiver = Self {
            name: name.into(),
            receiver: Mutex::new(Some(rx)),
            cancel: Mutex::new(None),
        };
        (receiver, tx)
    }
}

#[async_trait]
impl<T> InboundEventReceiver<T> for ChannelEventReceiver<T>
where
    T: Send + Sync + 'static,
{
    fn receiver_name(&self) -> String {
        self.name.clone()
    }

    async fn start(&self, sink: Arc<dyn EncodedEventSink<T>>) -> Result<()> {
        let mut rx = self.receiver.lock().take().ok_or_else(|| {
            Error::Configuration(format!("Channel receiver {} was already started", self.name))
        })?;
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let context = EventContext::new().with(CONTEXT_RECEIVER, self.name.clone());
        let name = self.name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    payload = rx.recv() => match payload {
                        Some(payload) => sink.on_encoded_event_received(payload, context.clone()).await,
                        None => break,
                    },
                }
            }
            debug!(receiver = %name, "Channel receiver stopped");
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }
}
