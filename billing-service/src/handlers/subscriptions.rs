//! Subscription handlers, scoped to the authenticated merchant.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::MerchantContext;
use crate::models::{
    BillingInterval, CreateSubscription, ListSubscriptionsFilter, Subscription,
    SubscriptionStatus,
};
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_name: String,
    pub amount: Decimal,
    pub interval: String,
    pub customer_wallet: String,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveSubscriptionRequest {
    pub approved_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page_size: Option<i32>,
    #[serde(default)]
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription_id: Uuid,
    pub merchant_id: Uuid,
    pub plan_name: String,
    pub amount: Decimal,
    pub interval: String,
    pub customer_wallet: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub approved_amount: Option<Decimal>,
    pub charge_count: i32,
    pub next_charge_utc: Option<DateTime<Utc>>,
    pub last_charged_utc: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub cancelled_utc: Option<DateTime<Utc>>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            subscription_id: s.subscription_id,
            merchant_id: s.merchant_id,
            plan_name: s.plan_name,
            amount: s.amount,
            interval: s.interval,
            customer_wallet: s.customer_wallet,
            customer_email: s.customer_email,
            status: s.status,
            approved_amount: s.approved_amount,
            charge_count: s.charge_count,
            next_charge_utc: s.next_charge_utc,
            last_charged_utc: s.last_charged_utc,
            last_failure_reason: s.last_failure_reason,
            created_utc: s.created_utc,
            cancelled_utc: s.cancelled_utc,
        }
    }
}

/// Fetch a subscription and verify it belongs to the requesting merchant.
async fn get_owned_subscription(
    state: &AppState,
    merchant: &MerchantContext,
    subscription_id: Uuid,
) -> Result<Subscription, AppError> {
    let subscription = state
        .store
        .get_subscription(subscription_id)
        .await?
        .filter(|s| s.merchant_id == merchant.merchant_id)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;
    Ok(subscription)
}

/// Create a subscription in pending approval.
///
/// POST /subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    merchant: MerchantContext,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), AppError> {
    let interval = BillingInterval::parse(&payload.interval).ok_or_else(|| {
        AppError::ValidationError(anyhow::anyhow!(
            "Interval must be one of weekly, monthly, yearly"
        ))
    })?;

    state
        .store
        .get_merchant(merchant.merchant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Merchant not found")))?;

    let subscription = state
        .lifecycle
        .create(&CreateSubscription {
            merchant_id: merchant.merchant_id,
            plan_name: payload.plan_name,
            amount: payload.amount,
            interval,
            customer_wallet: payload.customer_wallet,
            customer_email: payload.customer_email,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse::from(subscription)),
    ))
}

/// Get a subscription by ID.
///
/// GET /subscriptions/:id
pub async fn get_subscription(
    State(state): State<AppState>,
    merchant: MerchantContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = get_owned_subscription(&state, &merchant, subscription_id).await?;
    Ok(Json(SubscriptionResponse::from(subscription)))
}

/// List the merchant's subscriptions with an optional status filter.
///
/// GET /subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    merchant: MerchantContext,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Vec<SubscriptionResponse>>, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(SubscriptionStatus::parse(raw).ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!("Unknown subscription status '{}'", raw))
        })?),
        None => None,
    };

    let filter = ListSubscriptionsFilter {
        status,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let subscriptions = state
        .store
        .list_subscriptions(merchant.merchant_id, &filter)
        .await?;

    Ok(Json(
        subscriptions
            .into_iter()
            .map(SubscriptionResponse::from)
            .collect(),
    ))
}

/// Activate a subscription after the customer's on-chain approval.
///
/// POST /subscriptions/:id/approve
///
/// The gateway has already verified the approval transaction and wallet
/// ownership before this is called.
pub async fn approve_subscription(
    State(state): State<AppState>,
    merchant: MerchantContext,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<ApproveSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    get_owned_subscription(&state, &merchant, subscription_id).await?;

    let subscription = state
        .lifecycle
        .approve(subscription_id, payload.approved_amount, Utc::now())
        .await?;

    Ok(Json(SubscriptionResponse::from(subscription)))
}

/// Cancel a subscription. Terminal.
///
/// POST /subscriptions/:id/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    merchant: MerchantContext,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    get_owned_subscription(&state, &merchant, subscription_id).await?;

    let subscription = state.lifecycle.cancel(subscription_id, Utc::now()).await?;

    Ok(Json(SubscriptionResponse::from(subscription)))
}
