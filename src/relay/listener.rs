//! # Outbound Listener
//!
//! One task per session. It reads backend frames until the socket dies or
//! the session's cancellation token fires, and republishes them to the
//! client channel according to the relay mode.
//!
//! ## Exit paths:
//! - **Cancelled**: someone else tore the session down (disconnect, replacement,
//!   shutdown) and already cleaned up state. The listener just returns.
//! - **Stream ended / read failed / client gone**: the listener removes its own
//!   session from the registry and unbinds the stream context, guarded by the
//!   session generation so a successor session is never touched.
//!
//! Delivery is awaited before the next read, which keeps at most one push in
//! flight per session and preserves frame order.

use super::{RelayStats, SessionHandle, SessionRelay};
use crate::backend::FrameStream;
use crate::config::RelayMode;
use crate::error::DeliveryError;
use crate::protocol::backend::{self, BackendEvent, RESPONSE_AUDIO_DELTA};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
enum ListenerExit {
    Cancelled,
    StreamEnded,
    ReadFailed(anyhow::Error),
    ClientGone,
}

pub struct OutboundListener {
    relay: SessionRelay,
    connection_id: String,
    session_id: Uuid,
    generation: u64,
    cancel: CancellationToken,
}

impl OutboundListener {
    pub fn new(relay: SessionRelay, handle: &SessionHandle) -> Self {
        Self {
            relay,
            connection_id: handle.connection_id().to_string(),
            session_id: handle.session_id(),
            generation: handle.generation(),
            cancel: handle.cancellation(),
        }
    }

    /// Owns the read half for the whole session; it is dropped before teardown.
    pub async fn run(self, mut stream: FrameStream) {
        info!(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            mode = self.relay.mode.as_str(),
            "Outbound listener started"
        );

        let exit = self.pump(&mut stream).await;

        match &exit {
            ListenerExit::Cancelled => {
                debug!(
                    connection_id = %self.connection_id,
                    session_id = %self.session_id,
                    "Outbound listener stopped by session teardown"
                );
                return;
            }
            ListenerExit::StreamEnded => info!(
                connection_id = %self.connection_id,
                session_id = %self.session_id,
                "Backend stream ended"
            ),
            ListenerExit::ReadFailed(e) => warn!(
                connection_id = %self.connection_id,
                session_id = %self.session_id,
                error = %e,
                "Error reading from backend"
            ),
            ListenerExit::ClientGone => info!(
                connection_id = %self.connection_id,
                session_id = %self.session_id,
                "Client connection is gone"
            ),
        }

        // Stop reading before teardown closes the write half
        drop(stream);
        self.relay
            .teardown_after_listener(&self.connection_id, self.generation)
            .await;
    }

    async fn pump(&self, stream: &mut FrameStream) -> ListenerExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ListenerExit::Cancelled,
                frame = stream.next() => frame,
            };

            let raw = match next {
                None => return ListenerExit::StreamEnded,
                Some(Err(e)) => return ListenerExit::ReadFailed(e),
                Some(Ok(raw)) => raw,
            };

            if let Err(DeliveryError::Gone(_)) = self.handle_frame(&raw).await {
                return ListenerExit::ClientGone;
            }
        }
    }

    async fn handle_frame(&self, raw: &str) -> Result<(), DeliveryError> {
        match self.relay.mode {
            RelayMode::Passthrough => {
                debug!(connection_id = %self.connection_id, bytes = raw.len(), "Passing backend frame through");
                self.forward(raw.as_bytes()).await
            }
            RelayMode::Translate => self.translate_and_forward(raw).await,
        }
    }

    async fn translate_and_forward(&self, raw: &str) -> Result<(), DeliveryError> {
        let stats = &self.relay.stats;

        let event_type = match backend::event_type(raw) {
            Ok(event_type) => event_type,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Unparseable backend frame");
                RelayStats::bump(&stats.frames_dropped);
                return Ok(());
            }
        };

        if event_type != RESPONSE_AUDIO_DELTA {
            debug!(connection_id = %self.connection_id, event_type = %event_type, "Ignoring backend event");
            RelayStats::bump(&stats.frames_ignored);
            return Ok(());
        }

        let event: BackendEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Malformed audio delta");
                RelayStats::bump(&stats.frames_dropped);
                return Ok(());
            }
        };

        // Audio before the start frame has nowhere to go
        let Some(stream_sid) = self.relay.streams.resolve(&self.connection_id) else {
            debug!(connection_id = %self.connection_id, "No stream bound yet, dropping audio delta");
            RelayStats::bump(&stats.frames_dropped);
            return Ok(());
        };

        let Some(frame) = self.relay.translator.backend_to_telephony(&event, &stream_sid) else {
            RelayStats::bump(&stats.frames_ignored);
            return Ok(());
        };

        match serde_json::to_vec(&frame) {
            Ok(bytes) => self.forward(&bytes).await,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Failed to encode media frame");
                RelayStats::bump(&stats.frames_dropped);
                Ok(())
            }
        }
    }

    async fn forward(&self, bytes: &[u8]) -> Result<(), DeliveryError> {
        let stats = &self.relay.stats;

        match self.relay.delivery.deliver(&self.connection_id, bytes).await {
            Ok(()) => {
                RelayStats::bump(&stats.frames_to_client);
                Ok(())
            }
            Err(err) => {
                RelayStats::bump(&stats.delivery_failures);
                if err.is_gone() {
                    Err(err)
                } else {
                    // Session stays up; the frame is lost
                    warn!(connection_id = %self.connection_id, error = %err, "Failed to deliver frame to client");
                    Ok(())
                }
            }
        }
    }
}
