//! WebSocket receiver.
//!
//! Connects to a configured server and forwards every text frame as one
//! payload. Binary and control frames are ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwire_core::{Error, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WebSocketConfig;
use crate::decoder::EventContext;
use crate::source::{EncodedEventSink, InboundEventReceiver, CONTEXT_RECEIVER};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives string payloads from a WebSocket server.
pub struct WebSocketEventReceiver {
    config: WebSocketConfig,
    cancel: Mutex<Option<CancellationToken>>,
}

impl WebSocketEventReceiver {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            cancel: Mutex::new(None),
        }
    }

    fn client_request(&self) -> Result<Request> {
        let mut request = self.config.url.as_str().into_client_request().map_err(|e| {
            Error::Configuration(format!("Invalid web socket url {}: {}", self.config.url, e))
        })?;
        for (name, value) in &self.config.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Configuration(format!("Invalid web socket header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Configuration(format!("Invalid value for header {}: {}", name, e)))?;
            request.headers_mut().insert(header, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl InboundEventReceiver<String> for WebSocketEventReceiver {
    fn receiver_name(&self) -> String {
        self.config.url.clone()
    }

    async fn start(&self, sink: Arc<dyn EncodedEventSink<String>>) -> Result<()> {
        if self.cancel.lock().is_some() {
            return Err(Error::Configuration(format!(
                "Web socket receiver {} was already started",
                self.config.url
            )));
        }
        let request = self.client_request()?;
        let (mut stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| Error::Configuration(format!("Timed out connecting to web socket {}", self.config.url)))?
            .map_err(|e| {
                Error::Configuration(format!("Unable to connect to web socket {}: {}", self.config.url, e))
            })?;
        info!(url = %self.config.url, "Connected to web socket");

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());
        let name = self.receiver_name();
        tokio::spawn(async move {
            let context = EventContext::new().with(CONTEXT_RECEIVER, name.clone());
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = stream.next() => message,
                };
                match message {
                    Some(Ok(Message::Text(text))) => {
                        sink.on_encoded_event_received(text, context.clone()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(url = %name, "Web socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(url = %name, error = %e, "Web socket read failed");
                        break;
                    }
                }
            }
            let _ = stream.close(None).await;
            debug!(url = %name, "Web socket receiver stopped");
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
