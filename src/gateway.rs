//! # Gateway Delivery
//!
//! Pushes bytes to a client connection through the gateway's connection
//! management API (`POST {endpoint}/@connections/{connectionId}`).
//!
//! Two clients implement the same push:
//! - [`ManagementApiClient`]: the AWS SDK client, SigV4-signed with the ambient credentials
//! - [`HttpGatewayClient`]: a plain POST with an optional bearer token
//!
//! ## Outcomes:
//! - **Ok**: the gateway accepted the frame
//! - **Gone** (HTTP 410 / `GoneException`): the client socket no longer exists, the session must be torn down
//! - **Transient**: anything else; retried with backoff, then reported

use crate::config::{GatewayConfig, RelayConfig};
use crate::error::DeliveryError;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_apigatewaymanagement::error::DisplayErrorContext;
use aws_sdk_apigatewaymanagement::operation::post_to_connection::PostToConnectionError;
use aws_sdk_apigatewaymanagement::primitives::Blob;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One push to one client connection, no retries.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn post_to_connection(&self, connection_id: &str, data: Vec<u8>) -> Result<(), DeliveryError>;
}

/// Connection management API client from the AWS SDK.
pub struct ManagementApiClient {
    client: aws_sdk_apigatewaymanagement::Client,
}

impl ManagementApiClient {
    /// Credentials come from the default provider chain (environment, profile, task role).
    pub async fn new(config: &GatewayConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.request_timeout())
                    .build(),
            )
            // GatewayDelivery owns the retry policy
            .retry_config(RetryConfig::disabled())
            .load()
            .await;

        let api_config = aws_sdk_apigatewaymanagement::config::Builder::from(&sdk_config)
            .endpoint_url(config.endpoint.clone())
            .build();

        Self {
            client: aws_sdk_apigatewaymanagement::Client::from_conf(api_config),
        }
    }
}

#[async_trait]
impl GatewayClient for ManagementApiClient {
    async fn post_to_connection(&self, connection_id: &str, data: Vec<u8>) -> Result<(), DeliveryError> {
        self.client
            .post_to_connection()
            .connection_id(connection_id)
            .data(Blob::new(data))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| {
                classify_failure(
                    connection_id,
                    err.as_service_error(),
                    DisplayErrorContext(&err).to_string(),
                )
            })
    }
}

/// `GoneException` means the client left; every other failure may clear up.
fn classify_failure(
    connection_id: &str,
    service_error: Option<&PostToConnectionError>,
    detail: String,
) -> DeliveryError {
    match service_error {
        Some(err) if err.is_gone_exception() => DeliveryError::Gone(connection_id.to_string()),
        _ => DeliveryError::Transient(detail),
    }
}

/// `reqwest`-backed client for the connection management API.
pub struct HttpGatewayClient {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    auth_token: Option<String>,
}

impl HttpGatewayClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let endpoint = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid gateway endpoint '{}': {e}", config.endpoint))?;
        if endpoint.cannot_be_a_base() {
            return Err(anyhow::anyhow!("Gateway endpoint '{}' cannot carry a path", config.endpoint));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            auth_token: config.auth_token.clone(),
        })
    }

    /// `{endpoint}/@connections/{id}` with the id percent-encoded as one path segment.
    fn connection_url(&self, connection_id: &str) -> Result<reqwest::Url, DeliveryError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| DeliveryError::Transient("gateway endpoint cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("@connections")
            .push(connection_id);
        Ok(url)
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn post_to_connection(&self, connection_id: &str, data: Vec<u8>) -> Result<(), DeliveryError> {
        let url = self.connection_url(connection_id)?;

        let mut request = self.client.post(url).body(data);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::GONE {
            Err(DeliveryError::Gone(connection_id.to_string()))
        } else {
            Err(DeliveryError::Transient(format!("gateway returned {}", status)))
        }
    }
}

/// Gateway client plus the relay's retry policy.
///
/// Only `Transient` failures are retried. `Gone` is returned immediately.
#[derive(Clone)]
pub struct GatewayDelivery {
    client: Arc<dyn GatewayClient>,
    max_retries: u32,
    backoff: Duration,
}

impl GatewayDelivery {
    pub fn new(client: Arc<dyn GatewayClient>, relay: &RelayConfig) -> Self {
        Self {
            client,
            max_retries: relay.max_delivery_retries,
            backoff: relay.retry_backoff(),
        }
    }

    pub async fn deliver(&self, connection_id: &str, data: &[u8]) -> Result<(), DeliveryError> {
        let mut attempt = 0;
        let mut delay = self.backoff;

        loop {
            match self.client.post_to_connection(connection_id, data.to_vec()).await {
                Ok(()) => {
                    debug!(connection_id = %connection_id, bytes = data.len(), "Delivered frame to client");
                    return Ok(());
                }
                Err(DeliveryError::Transient(reason)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        connection_id = %connection_id,
                        attempt,
                        reason = %reason,
                        "Transient delivery failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
