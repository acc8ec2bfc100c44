//! In-memory stand-ins for the backend socket and the client gateway.

use crate::backend::{BackendDialer, BackendLink};
use crate::error::DeliveryError;
use crate::gateway::GatewayClient;
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(2);

/// The far end of a fake backend connection.
pub struct FakeBackend {
    sent: UnboundedReceiver<String>,
    inbound: Option<UnboundedSender<anyhow::Result<String>>>,
    writes_open: watch::Sender<bool>,
}

pub fn fake_link() -> (BackendLink, FakeBackend) {
    let (sent_tx, sent_rx) = mpsc::unbounded::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded::<anyhow::Result<String>>();

    let (writes_open, gate) = watch::channel(true);

    // Every write waits for the gate, so a test can make this backend stop accepting frames
    let sink = sent_tx
        .sink_map_err(anyhow::Error::from)
        .with(move |text: String| {
            let mut gate = gate.clone();
            async move {
                let open = gate.wait_for(|open| *open).await.is_ok();
                if open {
                    Ok(text)
                } else {
                    Err(anyhow::anyhow!("fake backend dropped"))
                }
            }
        });

    let link = BackendLink {
        sink: Box::pin(sink),
        stream: Box::pin(inbound_rx),
    };
    let backend = FakeBackend {
        sent: sent_rx,
        inbound: Some(inbound_tx),
        writes_open,
    };
    (link, backend)
}

impl FakeBackend {
    /// Next frame the relay wrote to this backend.
    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.sent.next()).await.ok().flatten()
    }

    pub async fn next_sent_json(&mut self) -> serde_json::Value {
        let raw = self.next_sent().await.expect("backend received nothing");
        serde_json::from_str(&raw).expect("backend received invalid JSON")
    }

    /// Push a frame towards the relay's outbound listener.
    pub fn emit(&self, raw: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.unbounded_send(Ok(raw.to_string()));
        }
    }

    pub fn fail_read(&self, reason: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.unbounded_send(Err(anyhow::anyhow!(reason.to_string())));
        }
    }

    /// Make every further write hang, like a peer that stopped reading.
    pub fn stall_writes(&self) {
        let _ = self.writes_open.send(false);
    }

    /// End the read stream as if the backend dropped the socket.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Whether the listener still holds the read half.
    pub fn listener_attached(&self) -> bool {
        self.inbound.as_ref().is_some_and(|inbound| !inbound.is_closed())
    }

    /// Wait until the relay closes the write half, discarding anything still queued.
    pub async fn wait_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(WAIT, self.sent.next()).await {
                Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    pub fn is_closed_now(&mut self) -> bool {
        loop {
            match self.sent.try_recv() {
                Ok(_) => continue,
                Err(e) => return e.is_closed(),
            }
        }
    }
}

#[derive(Default)]
pub struct FakeDialer {
    backends: Mutex<VecDeque<FakeBackend>>,
    fail: AtomicBool,
    dials: AtomicUsize,
}

impl FakeDialer {
    pub fn failing() -> Self {
        let dialer = Self::default();
        dialer.fail.store(true, Ordering::SeqCst);
        dialer
    }

    /// The oldest backend dialed and not yet taken.
    pub fn take_backend(&self) -> FakeBackend {
        self.backends
            .lock()
            .unwrap()
            .pop_front()
            .expect("no backend was dialed")
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendDialer for FakeDialer {
    async fn dial(&self, _connection_id: &str) -> anyhow::Result<BackendLink> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection refused"));
        }
        let (link, backend) = fake_link();
        self.backends.lock().unwrap().push_back(backend);
        Ok(link)
    }
}

#[derive(Default)]
struct GatewayState {
    delivered: HashMap<String, Vec<String>>,
    gone: HashSet<String>,
    failures: VecDeque<DeliveryError>,
    attempts: usize,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    /// Fail the next pushes with these errors, in order.
    pub fn fail_next(&self, failures: Vec<DeliveryError>) {
        self.state.lock().unwrap().failures.extend(failures);
    }

    pub fn mark_gone(&self, connection_id: &str) {
        self.state.lock().unwrap().gone.insert(connection_id.to_string());
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn delivered(&self, connection_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .delivered
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait until at least `count` frames reached `connection_id`.
    pub async fn wait_for(&self, connection_id: &str, count: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let delivered = self.delivered(connection_id);
            if delivered.len() >= count || tokio::time::Instant::now() >= deadline {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl GatewayClient for FakeGateway {
    async fn post_to_connection(&self, connection_id: &str, data: Vec<u8>) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        if state.gone.contains(connection_id) {
            return Err(DeliveryError::Gone(connection_id.to_string()));
        }
        state
            .delivered
            .entry(connection_id.to_string())
            .or_default()
            .push(String::from_utf8_lossy(&data).into_owned());
        Ok(())
    }
}

/// Poll `condition` until it holds or the wait budget runs out.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_write_half_is_seen_after_queued_frames() {
        let (mut link, mut backend) = fake_link();
        link.sink.send("queued".to_string()).await.unwrap();
        assert!(!backend.is_closed_now());

        link.sink.send("last".to_string()).await.unwrap();
        drop(link.sink);
        assert!(backend.is_closed_now());
    }

    #[tokio::test]
    async fn test_stalled_writes_never_reach_backend() {
        let (mut link, mut backend) = fake_link();
        backend.stall_writes();

        let write = tokio::time::timeout(Duration::from_millis(50), link.sink.send("held".to_string())).await;
        assert!(write.is_err());
        assert!(backend.sent.try_recv().is_err());
    }
}
