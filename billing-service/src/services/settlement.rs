//! Settlement client.
//!
//! The settlement service executes the on-chain stablecoin transfer for a
//! charge attempt and answers with the transaction hash. It is idempotent
//! per attempt token, so a timed-out attempt can be reconciled there without
//! risking a double transfer; this side always treats an ambiguous outcome
//! as a failure.

use crate::config::SettlementConfig;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Settlement failure taxonomy.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("insufficient allowance")]
    InsufficientAllowance,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("settlement request timed out")]
    Timeout,

    #[error("settlement network error: {0}")]
    Network(String),

    #[error("settlement rejected: {0}")]
    Rejected(String),
}

/// One charge attempt handed to the settlement service.
#[derive(Debug, Serialize)]
pub struct TransferRequest {
    /// Idempotency key for this attempt.
    pub attempt_token: Uuid,
    pub customer_wallet: String,
    pub merchant_wallet: String,
    pub amount: Decimal,
}

/// Successful settlement outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementReceipt {
    pub tx_hash: String,
}

/// Settlement service error body.
#[derive(Debug, Deserialize)]
struct SettlementErrorBody {
    code: String,
    message: Option<String>,
}

#[async_trait]
pub trait SettlementClient: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> Result<SettlementReceipt, SettlementError>;
}

/// HTTP client for the settlement service.
#[derive(Clone)]
pub struct HttpSettlementClient {
    client: Client,
    base_url: String,
}

impl HttpSettlementClient {
    pub fn new(config: &SettlementConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl SettlementClient for HttpSettlementClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<SettlementReceipt, SettlementError> {
        let url = format!("{}/transfers", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SettlementError::Timeout
                } else {
                    SettlementError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SettlementError::Network(e.to_string()))?;

        tracing::debug!(status = %status, body = %body, "Settlement transfer response");

        if status.is_success() {
            let receipt: SettlementReceipt = serde_json::from_str(&body)
                .map_err(|e| SettlementError::Network(format!("Invalid receipt body: {}", e)))?;
            tracing::info!(
                attempt_token = %request.attempt_token,
                tx_hash = %receipt.tx_hash,
                "Settlement transfer confirmed"
            );
            return Ok(receipt);
        }

        let error: SettlementErrorBody =
            serde_json::from_str(&body).unwrap_or(SettlementErrorBody {
                code: "unknown".to_string(),
                message: Some(body.clone()),
            });
        tracing::warn!(
            attempt_token = %request.attempt_token,
            code = %error.code,
            "Settlement transfer failed"
        );

        Err(match error.code.as_str() {
            "insufficient_allowance" => SettlementError::InsufficientAllowance,
            "insufficient_balance" => SettlementError::InsufficientBalance,
            code => SettlementError::Rejected(format!(
                "{}: {}",
                code,
                error.message.unwrap_or_default()
            )),
        })
    }
}
