//! # Stream Context Store
//!
//! Remembers which telephony stream a connection's audio belongs to, so
//! backend audio can be addressed back to the right call leg. A binding is
//! created by the `start` control frame and dropped with the session.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct StreamContextStore {
    streams: RwLock<HashMap<String, String>>,
}

impl StreamContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind) `connection_id` to `stream_sid`.
    pub fn bind(&self, connection_id: &str, stream_sid: &str) {
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id.to_string(), stream_sid.to_string());
    }

    pub fn resolve(&self, connection_id: &str) -> Option<String> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .cloned()
    }

    /// Returns whether a binding existed. Unbinding an unknown id is fine.
    pub fn unbind(&self, connection_id: &str) -> bool {
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.streams.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.streams.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
