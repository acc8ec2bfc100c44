//! # Configuration Management
//!
//! This module handles loading and managing relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, nested keys separated by `__`)
//! - The deployment's conventional variables (PORT, API_GATEWAY_ENDPOINT, OPENAI_WSS_URL, ...)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Conventional variables (PORT, HOST, API_GATEWAY_ENDPOINT, AWS_REGION, OPENAI_WSS_URL, OPENAI_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_BACKEND__URL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Required values:
//! The gateway endpoint, backend URL and backend credential have no usable default.
//! `validate()` rejects a configuration without them, and `main` exits before
//! serving any traffic.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main relay configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each section maps to one collaborator: the HTTP listener, the client gateway,
/// the realtime backend, the per-session persona, and the relay loop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub relay: RelayConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind the webhook listener to (e.g., "0.0.0.0")
/// - `port`: TCP port number to listen on (8080 unless PORT says otherwise)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Client-facing gateway (connection management API) settings.
///
/// ## Fields:
/// - `kind`: which client pushes frames (see [`GatewayKind`])
/// - `endpoint`: Base URL of the management API, e.g. `https://abc.execute-api.us-east-1.amazonaws.com/prod`
/// - `region`: signing region for the `aws` client
/// - `request_timeout_ms`: Upper bound for a single push to a client connection
/// - `auth_token`: Optional bearer token attached to every push by the `http` client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub kind: GatewayKind,
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// How pushes to client connections are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// Management API through the AWS SDK, SigV4-signed with the ambient credentials
    #[default]
    Aws,
    /// Plain HTTP POST, for gateways that are not AWS or sit behind a signing proxy
    Http,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Aws => "aws",
            GatewayKind::Http => "http",
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Realtime speech backend settings.
///
/// The `api_key` is a secret: it is sent as a bearer header on the WebSocket
/// upgrade and never serialized into any HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    pub beta_header: String,
    pub connect_timeout_ms: u64,
}

/// Persona and audio format announced to the backend with `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// When set, the backend is asked to transcribe caller audio with this model
    #[serde(default)]
    pub transcription_model: Option<String>,
}

/// How backend frames are republished to the client channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Only `response.audio.delta` events are forwarded, rewritten as telephony media frames
    Translate,
    /// Every backend frame is forwarded to the client byte-for-byte
    Passthrough,
}

impl RelayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayMode::Translate => "translate",
            RelayMode::Passthrough => "passthrough",
        }
    }
}

/// Relay loop tuning.
///
/// ## Fields:
/// - `mode`: translate or passthrough (see [`RelayMode`])
/// - `max_delivery_retries`: extra attempts after a transient delivery failure
/// - `retry_backoff_ms`: first backoff delay, doubled on every further attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub max_delivery_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            gateway: GatewayConfig {
                kind: GatewayKind::Aws,
                endpoint: String::new(),   // required, no sensible default
                region: default_region(),
                request_timeout_ms: 5_000,
                auth_token: None,
            },
            backend: BackendConfig {
                url: String::new(),        // required
                api_key: String::new(),    // required
                beta_header: "realtime=v1".to_string(),
                connect_timeout_ms: 10_000,
            },
            session: SessionConfig {
                instructions: "You are a helpful voice assistant. Keep answers short.".to_string(),
                input_audio_format: "g711_ulaw".to_string(),   // μ-law 8kHz telephony audio
                output_audio_format: "g711_ulaw".to_string(),
                transcription_model: None,
            },
            relay: RelayConfig {
                mode: RelayMode::Translate,
                max_delivery_retries: 2,
                retry_backoff_ms: 50,
            },
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl RelayConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_RELAY__MODE=passthrough`: Forward every backend frame verbatim
    /// - `APP_SESSION__INSTRUCTIONS=...`: Override the persona
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `API_GATEWAY_ENDPOINT=https://...`: Gateway management endpoint
    /// - `AWS_REGION=eu-west-1`: Signing region for the gateway client
    /// - `OPENAI_WSS_URL=wss://...` / `OPENAI_API_KEY=...`: Backend connection
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Conventional deployment variables win over everything else
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("API_GATEWAY_ENDPOINT", "gateway.endpoint"),
            ("AWS_REGION", "gateway.region"),
            ("OPENAI_WSS_URL", "backend.url"),
            ("OPENAI_API_KEY", "backend.api_key"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    settings = settings.set_override(key, value)?;
                }
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Gateway endpoint is an http(s) URL, and the `aws` client has a region
    /// - Backend URL is a ws(s) URL and a credential is present
    /// - Audio formats are named
    ///
    /// Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.gateway.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Gateway endpoint is not set (API_GATEWAY_ENDPOINT or gateway.endpoint)"
            ));
        }
        if !has_scheme(&self.gateway.endpoint, &["http://", "https://"]) {
            return Err(anyhow::anyhow!(
                "Gateway endpoint must be an http(s) URL, got '{}'",
                self.gateway.endpoint
            ));
        }

        if self.gateway.kind == GatewayKind::Aws && self.gateway.region.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Gateway region is not set (AWS_REGION or gateway.region)"
            ));
        }

        if self.backend.url.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Backend URL is not set (OPENAI_WSS_URL or backend.url)"
            ));
        }
        if !has_scheme(&self.backend.url, &["ws://", "wss://"]) {
            return Err(anyhow::anyhow!(
                "Backend URL must be a ws(s) URL, got '{}'",
                self.backend.url
            ));
        }
        if self.backend.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Backend credential is not set (OPENAI_API_KEY or backend.api_key)"
            ));
        }

        if self.session.input_audio_format.is_empty() || self.session.output_audio_format.is_empty() {
            return Err(anyhow::anyhow!("Session audio formats must not be empty"));
        }

        Ok(())
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    let lower = url.to_ascii_lowercase();
    schemes.iter().any(|scheme| lower.starts_with(scheme))
}
