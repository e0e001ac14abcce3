//! HTTP client for a Snap-style charge endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use common::TopupId;
use reqwest::{
    Client,
    header::{ACCEPT, AUTHORIZATION},
};
use tracing::{instrument, warn};

use crate::{Charge, ChargeRequest, GatewayError, PaymentGateway, Result};

/// Settings for [`SnapGateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Full URL of the charge endpoint.
    pub base_url: String,
    pub server_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts after the first, for transport errors and 5xx only.
    pub max_retries: u32,
    /// The single status code treated as success.
    pub success_status: u16,
    /// Delay before the first retry; doubled on each further retry.
    pub retry_backoff: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, server_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            server_key: server_key.into(),
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.sandbox.midtrans.com/snap/v1/transactions".to_string(),
            server_key: String::new(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            success_status: 201,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Charge client speaking the Snap transaction API.
#[derive(Clone)]
pub struct SnapGateway {
    client: Client,
    config: GatewayConfig,
    auth_header: String,
}

impl SnapGateway {
    /// Builds the client. Fails only if the underlying HTTP client cannot be
    /// initialized.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let auth_header = format!("Basic {}", STANDARD.encode(format!("{}:", config.server_key)));

        Ok(Self {
            client,
            config,
            auth_header,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn send_once(&self, body: &ChargeRequest) -> Result<Charge> {
        let response = self
            .client
            .post(&self.config.base_url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if status != self.config.success_status {
            return Err(GatewayError::UnexpectedStatus { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for SnapGateway {
    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn create_charge(&self, order_id: TopupId, amount: i64) -> Result<Charge> {
        let body = ChargeRequest::new(order_id, amount);
        let mut attempt = 0u32;

        loop {
            match self.send_once(&body).await {
                Ok(charge) => return Ok(charge),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_backoff, attempt);
                    attempt += 1;
                    warn!(error = %err, attempt, ?delay, "charge request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}
