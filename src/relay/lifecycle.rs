//! # Session Lifecycle
//!
//! Entry points invoked by the inbound webhook handlers. They orchestrate the
//! registry, the stream context store, the translator and the backend socket.
//!
//! ## Session Lifecycle:
//! 1. **connect**: dial the backend, register, start the listener, send `session.update`
//! 2. **start frame**: bind the telephony stream id (only for a live session)
//! 3. **media frames**: caller audio → `input_audio_buffer.append`
//! 4. **disconnect** (or backend/client death): close the socket, forget the stream

use super::listener::OutboundListener;
use super::{RelayStats, SessionHandle, SessionRelay};
use crate::error::{AppError, AppResult};
use crate::protocol::{TelephonyEvent, TelephonyFrame};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a successful `connect`.
#[derive(Debug, Clone)]
pub struct ConnectedSession {
    pub connection_id: String,
    pub session_id: Uuid,
    /// Whether an older session for the same connection id was torn down
    pub replaced: bool,
}

impl SessionRelay {
    pub async fn connect(&self, connection_id: &str) -> AppResult<ConnectedSession> {
        let link = self.dialer.dial(connection_id).await.map_err(|e| {
            warn!(connection_id = %connection_id, error = %e, "Backend dial failed");
            AppError::BackendUnavailable(e.to_string())
        })?;

        let generation = self.registry.next_generation();
        let handle = Arc::new(SessionHandle::new(connection_id.to_string(), generation, link.sink));

        let replaced = self.registry.register(handle.clone()).await;
        if replaced {
            // The old stream id belonged to the old session
            self.streams.unbind(connection_id);
            info!(connection_id = %connection_id, "Replaced existing session");
        }

        let listener = OutboundListener::new(self.clone(), &handle);
        tokio::spawn(listener.run(link.stream));

        let configure = self.translator.configure_session();
        if let Err(e) = handle.send(&configure).await {
            warn!(connection_id = %connection_id, error = %e, "Failed to send session.update");
            if self.registry.remove_if_current(connection_id, generation).await {
                self.streams.unbind(connection_id);
            }
            return Err(AppError::BackendUnavailable(format!("failed to configure session: {e}")));
        }

        RelayStats::bump(&self.stats.sessions_opened);
        info!(
            connection_id = %connection_id,
            session_id = %handle.session_id(),
            "Backend session established"
        );

        Ok(ConnectedSession {
            connection_id: connection_id.to_string(),
            session_id: handle.session_id(),
            replaced,
        })
    }

    /// Tear down whatever exists for `connection_id`. Always succeeds.
    pub async fn disconnect(&self, connection_id: &str) {
        let removed = self.registry.remove(connection_id).await;
        let unbound = self.streams.unbind(connection_id);
        info!(
            connection_id = %connection_id,
            session_removed = removed,
            stream_unbound = unbound,
            "Disconnected client"
        );
    }

    pub async fn on_media_frame(&self, connection_id: &str, frame: &TelephonyFrame) -> AppResult<()> {
        match frame.kind() {
            TelephonyEvent::Start => {
                let stream_sid = frame
                    .stream_sid
                    .as_deref()
                    .filter(|sid| !sid.is_empty())
                    .ok_or_else(|| AppError::ValidationError("start frame without streamSid".to_string()))?;
                self.bind_stream(connection_id, stream_sid)
            }
            TelephonyEvent::Media => {
                let event = self
                    .translator
                    .telephony_to_backend(frame)
                    .ok_or_else(|| AppError::ValidationError("media frame without media".to_string()))?;
                let text = serde_json::to_string(&event).map_err(|e| AppError::Internal(e.to_string()))?;
                self.send_to_backend(connection_id, text).await
            }
            TelephonyEvent::Other => {
                debug!(connection_id = %connection_id, event = %frame.event, "Ignoring telephony event");
                Ok(())
            }
        }
    }

    /// A stream id is only recorded while its session is alive.
    fn bind_stream(&self, connection_id: &str, stream_sid: &str) -> AppResult<()> {
        let handle = self
            .registry
            .lookup(connection_id)
            .ok_or_else(|| AppError::SessionNotFound(connection_id.to_string()))?;

        self.streams.bind(connection_id, stream_sid);

        // The session may have been torn down or replaced between lookup and bind
        let still_current = self
            .registry
            .lookup(connection_id)
            .is_some_and(|current| current.generation() == handle.generation());
        if !still_current {
            self.streams.unbind(connection_id);
            return Err(AppError::SessionNotFound(connection_id.to_string()));
        }

        info!(connection_id = %connection_id, stream_sid = %stream_sid, "Bound telephony stream");
        Ok(())
    }

    /// Write `payload` to the backend exactly as given.
    pub async fn on_raw_message(&self, connection_id: &str, payload: String) -> AppResult<()> {
        self.send_to_backend(connection_id, payload).await
    }

    async fn send_to_backend(&self, connection_id: &str, text: String) -> AppResult<()> {
        let handle = self
            .registry
            .lookup(connection_id)
            .ok_or_else(|| AppError::SessionNotFound(connection_id.to_string()))?;

        handle.send_text(text).await.map_err(|e| {
            warn!(connection_id = %connection_id, error = %e, "Failed to write to backend");
            AppError::BackendUnavailable(e.to_string())
        })?;

        RelayStats::bump(&self.stats.frames_to_backend);
        Ok(())
    }

    /// Cleanup after a listener exits on its own (socket death or client gone).
    pub(crate) async fn teardown_after_listener(&self, connection_id: &str, generation: u64) {
        if self.registry.remove_if_current(connection_id, generation).await {
            self.streams.unbind(connection_id);
            info!(connection_id = %connection_id, "Session torn down after listener exit");
        } else {
            debug!(connection_id = %connection_id, "Session already replaced or removed");
        }
    }
}
