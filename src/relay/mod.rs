//! # Session Relay
//!
//! The core of the service: it pairs every gateway connection with a backend
//! realtime session and moves audio between them.
//!
//! ## Components:
//! - **registry**: connection id → owned backend session (one per id)
//! - **stream_context**: connection id → telephony stream id
//! - **listener**: one task per session, backend frames → client channel
//! - **lifecycle**: connect / disconnect / media entry points used by the HTTP handlers
//!
//! ## Data flow:
//! ```text
//! webhook ──► lifecycle ──► registry / stream_context / translator ──► backend socket
//! backend socket ──► listener ──► translator ──► gateway delivery ──► client
//! ```

pub mod lifecycle;
pub mod listener;
pub mod registry;
pub mod stream_context;

pub use registry::{SessionHandle, SessionRegistry};
pub use stream_context::StreamContextStore;

use crate::backend::BackendDialer;
use crate::config::{AppConfig, RelayMode};
use crate::gateway::{GatewayClient, GatewayDelivery};
use crate::protocol::Translator;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Everything a session needs, shared by all handlers and listeners.
///
/// Cloning is cheap: every field is reference counted.
#[derive(Clone)]
pub struct SessionRelay {
    registry: Arc<SessionRegistry>,
    streams: Arc<StreamContextStore>,
    translator: Arc<Translator>,
    dialer: Arc<dyn BackendDialer>,
    delivery: GatewayDelivery,
    mode: RelayMode,
    stats: Arc<RelayStats>,
}

impl SessionRelay {
    pub fn new(config: &AppConfig, dialer: Arc<dyn BackendDialer>, gateway: Arc<dyn GatewayClient>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            streams: Arc::new(StreamContextStore::new()),
            translator: Arc::new(Translator::from_config(&config.session)),
            dialer,
            delivery: GatewayDelivery::new(gateway, &config.relay),
            mode: config.relay.mode,
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn streams(&self) -> &StreamContextStore {
        &self.streams
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Close every session. Called once the HTTP server has stopped accepting requests.
    pub async fn shutdown(&self) {
        let closed = self.registry.drain().await;
        self.streams.clear();
        info!(sessions = closed, "Relay shut down");
    }
}

/// Frame counters, updated lock-free from handlers and listeners.
#[derive(Debug, Default)]
pub struct RelayStats {
    sessions_opened: AtomicU64,
    frames_to_backend: AtomicU64,
    frames_to_client: AtomicU64,
    frames_dropped: AtomicU64,
    frames_ignored: AtomicU64,
    delivery_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatsSnapshot {
    pub sessions_opened: u64,
    pub frames_to_backend: u64,
    pub frames_to_client: u64,
    /// Backend audio with no stream bound, or frames that failed to parse
    pub frames_dropped: u64,
    /// Backend events outside the translated set (translate mode only)
    pub frames_ignored: u64,
    pub delivery_failures: u64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            frames_to_backend: self.frames_to_backend.load(Ordering::Relaxed),
            frames_to_client: self.frames_to_client.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
