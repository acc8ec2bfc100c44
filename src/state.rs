//! # Application State
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the validated configuration, fixed for the process lifetime
//! - **metrics**: HTTP request counters written by `MetricsMiddleware`
//! - **relay**: the session relay (registry, stream contexts, backend dialer, gateway delivery)
//!
//! ## Key Rust Concepts Used:
//! - **Arc**: every clone of `AppState` points at the same data. actix builds one
//!   `App` per worker thread, so each worker gets a clone.
//! - **RwLock**: metrics are written on every request and read by `/api/v1/metrics`.
//!   A poisoned lock still holds usable counters, so we recover the guard
//!   with `PoisonError::into_inner` instead of panicking.

use crate::config::AppConfig;
use crate::relay::SessionRelay;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Configuration is read-only after startup; the relay was built from it
    pub config: Arc<AppConfig>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (used for uptime)
    pub start_time: Instant,

    pub relay: SessionRelay,
}

/// HTTP-level counters collected across all requests.
///
/// ## Fields:
/// - `request_count`: total requests processed since start
/// - `error_count`: requests answered with a 4xx/5xx status
/// - `endpoint_metrics`: per-route statistics keyed by `"METHOD /pattern"`
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Cumulative handling time in milliseconds
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, relay: SessionRelay) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            relay,
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Called by the middleware for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record one request against its route.
    ///
    /// ## Parameters:
    /// - **endpoint**: method plus route pattern, e.g. `"POST /msg"`
    /// - **duration_ms**: time spent in the handler chain
    /// - **is_error**: whether the response status was 4xx/5xx
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the counters, so the lock is not held while serializing a response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::testing::{FakeDialer, FakeGateway};

    /// Configuration that passes `validate()`.
    pub fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.gateway.endpoint = "https://gateway.test/prod".to_string();
        config.backend.url = "wss://backend.test/v1/realtime".to_string();
        config.backend.api_key = "sk-test".to_string();
        config.relay.retry_backoff_ms = 1;
        config
    }

    pub fn state_with(config: AppConfig) -> (AppState, Arc<FakeDialer>, Arc<FakeGateway>) {
        let dialer = Arc::new(FakeDialer::default());
        let gateway = Arc::new(FakeGateway::default());
        let relay = SessionRelay::new(&config, dialer.clone(), gateway.clone());
        (AppState::new(config, relay), dialer, gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let (state, _, _) = state_with(valid_config());
        state.record_endpoint_request("POST /msg", 10, false);
        state.record_endpoint_request("POST /msg", 30, true);
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 1);
        assert_eq!(snapshot.error_count, 1);

        let msg = &snapshot.endpoint_metrics["POST /msg"];
        assert_eq!(msg.request_count, 2);
        assert_eq!(msg.average_duration_ms(), 20.0);
        assert_eq!(msg.error_rate(), 0.5);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = super::EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }
}
