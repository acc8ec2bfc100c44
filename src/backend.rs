//! # Realtime Backend Connections
//!
//! Dials the remote speech backend over WebSocket and hands the caller a
//! split connection: a write half for request handlers and a read half for
//! the session's outbound listener.
//!
//! ## Protocol Overview
//! 1. **Connect**: WebSocket upgrade with `Authorization: Bearer <key>` and `OpenAI-Beta`
//! 2. **Setup**: the relay sends `session.update` (see `protocol::translator`)
//! 3. **Stream**: JSON text frames in both directions
//! 4. **Close**: either side closes the socket
//!
//! The [`BackendDialer`] trait is the seam between the relay and the network,
//! so sessions can be exercised against in-memory links.

use crate::config::BackendConfig;
use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

/// Write half of a backend connection. Accepts serialized JSON frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// Read half of a backend connection. Yields JSON text frames until the socket dies.
pub type FrameStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// A freshly dialed backend connection, already split into its two halves.
pub struct BackendLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Something that can open a backend connection on behalf of a client connection.
#[async_trait]
pub trait BackendDialer: Send + Sync {
    async fn dial(&self, connection_id: &str) -> anyhow::Result<BackendLink>;
}

/// Production dialer for the realtime WebSocket API.
pub struct RealtimeDialer {
    config: BackendConfig,
}

impl RealtimeDialer {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendDialer for RealtimeDialer {
    async fn dial(&self, connection_id: &str) -> anyhow::Result<BackendLink> {
        info!(connection_id = %connection_id, url = %self.config.url, "Connecting to realtime backend");

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Failed to build WebSocket request: {e}"))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.config.api_key)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid auth header: {e}"))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            self.config
                .beta_header
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid beta header: {e}"))?,
        );

        let timeout = self.config.connect_timeout();
        let (ws_stream, response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out after {:?} connecting to realtime backend", timeout))?
            .map_err(|e| anyhow::anyhow!("Failed to connect to realtime backend: {e}"))?;

        debug!(
            connection_id = %connection_id,
            status = response.status().as_u16(),
            "Realtime backend handshake complete"
        );

        let (ws_sender, ws_receiver) = ws_stream.split();

        let sink = ws_sender
            .sink_map_err(anyhow::Error::from)
            .with(|text: String| future::ready(Ok::<_, anyhow::Error>(WsMessage::Text(text))));

        let stream = ws_receiver.filter_map(|message| future::ready(text_frame(message)));

        Ok(BackendLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Reduce a raw WebSocket message to the JSON text the relay cares about.
///
/// Control frames are answered by tungstenite itself and skipped here. A close
/// frame surfaces as an error so the listener treats it like any other socket death.
fn text_frame(
    message: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<anyhow::Result<String>> {
    match message {
        Ok(WsMessage::Text(text)) => Some(Ok(text)),
        Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
        Ok(WsMessage::Close(frame)) => {
            let reason = frame
                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                .unwrap_or_else(|| "no close frame".to_string());
            Some(Err(anyhow::anyhow!("Backend closed the connection ({reason})")))
        }
        Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => None,
        Err(e) => Some(Err(anyhow::Error::from(e))),
    }
}
