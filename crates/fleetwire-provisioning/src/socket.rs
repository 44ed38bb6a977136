//! Raw TCP socket receiver.
//!
//! Each accepted connection carries one payload: the receiver reads until
//! the peer closes its write half and forwards the bytes to the sink.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::{Error, Result};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SocketConfig;
use crate::decoder::EventContext;
use crate::source::{EncodedEventSink, InboundEventReceiver, CONTEXT_RECEIVER};

/// Context key holding the remote address of the connection.
pub const CONTEXT_PEER: &str = "peer";

/// Listens on a TCP port and forwards each connection's bytes as one payload.
pub struct SocketInboundEventReceiver {
    config: SocketConfig,
    local_addr: Mutex<Option<SocketAddr>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SocketInboundEventReceiver {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            local_addr: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

async fn read_payload(stream: TcpStream, limit: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut payload = Vec::new();
    // One extra byte tells an exact-limit payload apart from an oversized one.
    let read = stream.take(limit as u64 + 1).read_to_end(&mut payload).await?;
    Ok((read <= limit).then_some(payload))
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    name: String,
    limit: usize,
    sink: Arc<dyn EncodedEventSink<Vec<u8>>>,
) {
    match read_payload(stream, limit).await {
        Ok(Some(payload)) if payload.is_empty() => {
            debug!(receiver = %name, %peer, "Connection closed without payload");
        }
        Ok(Some(payload)) => {
            let context = EventContext::new()
                .with(CONTEXT_RECEIVER, name)
                .with(CONTEXT_PEER, peer.to_string());
            sink.on_encoded_event_received(payload, context).await;
        }
        Ok(None) => warn!(receiver = %name, %peer, limit, "Dropping oversized socket payload"),
        Err(e) => error!(receiver = %name, %peer, error = %e, "Failed to read socket payload"),
    }
}

async fn accept_loop(
    listener: TcpListener,
    name: String,
    config: SocketConfig,
    sink: Arc<dyn EncodedEventSink<Vec<u8>>>,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let handler = handle_connection(
                    stream,
                    peer,
                    name.clone(),
                    config.max_payload_bytes,
                    sink.clone(),
                );
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = handler => {}
                    }
                    drop(permit);
                });
            }
            Err(e) => error!(receiver = %name, error = %e, "Failed to accept socket connection"),
        }
    }
    debug!(receiver = %name, "Socket receiver stopped");
}

#[async_trait]
impl InboundEventReceiver<Vec<u8>> for SocketInboundEventReceiver {
    fn receiver_name(&self) -> String {
        format!("tcp://{}:{}", self.config.bind_address, self.config.port)
    }

    async fn start(&self, sink: Arc<dyn EncodedEventSink<Vec<u8>>>) -> Result<()> {
        if self.cancel.lock().is_some() {
            return Err(Error::Configuration(format!(
                "Socket receiver {} was already started",
                self.receiver_name()
            )));
        }
        let listener = TcpListener::bind((self.config.bind_address.as_str(), self.config.port))
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "Unable to bind server socket on {}: {}",
                    self.receiver_name(),
                    e
                ))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Configuration(format!("Unable to read bound socket address: {}", e)))?;

        let cancel = CancellationToken::new();
        *self.local_addr.lock() = Some(local_addr);
        *self.cancel.lock() = Some(cancel.clone());
        tokio::spawn(accept_loop(
            listener,
            self.receiver_name(),
            self.config.clone(),
            sink,
            cancel,
        ));
        info!(
            address = %local_addr,
            max_connections = self.config.max_connections,
            "Socket receiver listening"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        self.local_addr.lock().take();
        Ok(())
    }
}
