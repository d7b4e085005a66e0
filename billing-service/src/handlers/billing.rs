//! Internal billing routes, driven by the platform scheduler.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::handlers::subscriptions::SubscriptionResponse;
use crate::middleware::SchedulerAuth;
use crate::models::{
    BillingRun, BillingRunResult, BillingRunStatus, BillingRunType, ListBillingRunsFilter,
};
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct AsOfQuery {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RunBatchRequest {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListBillingRunsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub run_type: Option<String>,
    #[serde(default)]
    pub page_size: Option<i32>,
    #[serde(default)]
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ChargeResultRequest {
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct PastDueRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BillingRunResponse {
    pub run: BillingRun,
    pub results: Vec<BillingRunResult>,
}

/// List subscriptions due for a charge attempt.
///
/// GET /internal/billing/due
pub async fn get_due_subscriptions(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<Vec<SubscriptionResponse>>, AppError> {
    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let due = state.store.find_due_subscriptions(as_of).await?;

    Ok(Json(
        due.into_iter().map(SubscriptionResponse::from).collect(),
    ))
}

/// Run a billing batch over every due subscription.
///
/// POST /internal/billing/run
pub async fn run_batch(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Json(payload): Json<RunBatchRequest>,
) -> Result<Json<BillingRunResponse>, AppError> {
    let as_of = payload.as_of.unwrap_or_else(Utc::now);
    let run_type = payload
        .run_type
        .as_deref()
        .map(BillingRunType::from_string)
        .unwrap_or(BillingRunType::Scheduled);

    let (run, results) = state.engine.run_batch(as_of, run_type).await?;

    Ok(Json(BillingRunResponse { run, results }))
}

/// List past billing runs.
///
/// GET /internal/billing/runs
pub async fn list_billing_runs(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Query(query): Query<ListBillingRunsQuery>,
) -> Result<Json<Vec<BillingRun>>, AppError> {
    let filter = ListBillingRunsFilter {
        status: query.status.as_deref().map(BillingRunStatus::from_string),
        run_type: query.run_type.as_deref().map(BillingRunType::from_string),
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let runs = state.store.list_billing_runs(&filter).await?;
    Ok(Json(runs))
}

/// Get a billing run with its per-subscription results.
///
/// GET /internal/billing/runs/:id
pub async fn get_billing_run(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Path(run_id): Path<Uuid>,
) -> Result<Json<BillingRunResponse>, AppError> {
    let run = state
        .store
        .get_billing_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing run not found")))?;
    let results = state.store.get_billing_run_results(run_id).await?;

    Ok(Json(BillingRunResponse { run, results }))
}

/// Record an externally-settled charge.
///
/// POST /internal/subscriptions/:id/charge-result
pub async fn record_charge_result(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<ChargeResultRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state
        .lifecycle
        .record_successful_charge(subscription_id, &payload.tx_hash, Utc::now())
        .await?;

    Ok(Json(SubscriptionResponse::from(subscription)))
}

/// Mark a subscription past due after an external charge failure.
///
/// POST /internal/subscriptions/:id/past-due
pub async fn mark_past_due(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<PastDueRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state
        .lifecycle
        .record_failed_charge(subscription_id, &payload.reason, Utc::now())
        .await?;

    Ok(Json(SubscriptionResponse::from(subscription)))
}
