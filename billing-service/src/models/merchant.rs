//! Merchant model.
//!
//! Minimal record carrying the settlement destination wallet. API keys and
//! authentication live in the upstream gateway, not here.

use super::subscription::validate_wallet_address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// Merchant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Merchant {
    pub merchant_id: Uuid,
    pub business_name: String,
    pub wallet_address: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a merchant.
#[derive(Debug, Clone)]
pub struct CreateMerchant {
    pub business_name: String,
    pub wallet_address: String,
}

impl CreateMerchant {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.business_name.trim().is_empty() {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Business name must not be empty"
            )));
        }
        validate_wallet_address(&self.wallet_address)?;
        Ok(())
    }
}
