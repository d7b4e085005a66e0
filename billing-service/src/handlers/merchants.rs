//! Merchant handlers. Operator surface, scheduler-authenticated.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::SchedulerAuth;
use crate::models::{CreateMerchant, Merchant};
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateMerchantRequest {
    pub business_name: String,
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct MerchantResponse {
    pub merchant_id: Uuid,
    pub business_name: String,
    pub wallet_address: String,
    pub created_utc: DateTime<Utc>,
}

impl From<Merchant> for MerchantResponse {
    fn from(m: Merchant) -> Self {
        Self {
            merchant_id: m.merchant_id,
            business_name: m.business_name,
            wallet_address: m.wallet_address,
            created_utc: m.created_utc,
        }
    }
}

/// Register a merchant with its settlement wallet.
///
/// POST /merchants
pub async fn create_merchant(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Json(payload): Json<CreateMerchantRequest>,
) -> Result<(StatusCode, Json<MerchantResponse>), AppError> {
    let merchant = state
        .store
        .create_merchant(&CreateMerchant {
            business_name: payload.business_name,
            wallet_address: payload.wallet_address,
        })
        .await?;

    tracing::info!(merchant_id = %merchant.merchant_id, "Merchant registered");

    Ok((StatusCode::CREATED, Json(MerchantResponse::from(merchant))))
}

/// Get a merchant by ID.
///
/// GET /merchants/:id
pub async fn get_merchant(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Path(merchant_id): Path<Uuid>,
) -> Result<Json<MerchantResponse>, AppError> {
    let merchant = state
        .store
        .get_merchant(merchant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Merchant not found")))?;

    Ok(Json(MerchantResponse::from(merchant)))
}
