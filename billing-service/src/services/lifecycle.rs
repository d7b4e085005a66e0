//! Lifecycle controller: every subscription state transition goes through
//! here. The store's conditional updates are the authoritative guard; this
//! layer reads first to produce precise errors for the boundary.

use crate::models::{CreateSubscription, Subscription, SubscriptionStatus, next_charge_after};
use crate::services::metrics::{record_charge_amount, record_subscription_operation};
use crate::services::store::BillingStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct SubscriptionLifecycle {
    store: Arc<dyn BillingStore>,
}

impl SubscriptionLifecycle {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Create a subscription in `pending_approval` with no schedule.
    #[instrument(skip(self, input), fields(merchant_id = %input.merchant_id))]
    pub async fn create(&self, input: &CreateSubscription) -> Result<Subscription, AppError> {
        let subscription = self.store.create_subscription(input).await?;

        record_subscription_operation(&subscription.merchant_id.to_string(), "created");
        tracing::info!(
            subscription_id = %subscription.subscription_id,
            plan_name = %subscription.plan_name,
            "Subscription created"
        );

        Ok(subscription)
    }

    /// pending_approval -> active.
    ///
    /// The caller has already verified the on-chain approval transaction and
    /// wallet ownership; this only applies the transition. The first charge
    /// is scheduled one interval from the approval time.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn approve(
        &self,
        subscription_id: Uuid,
        approved_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let existing = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if existing.status != SubscriptionStatus::PendingApproval.as_str() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Subscription must be pending approval to approve"
            )));
        }
        if approved_amount < existing.amount {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Approved amount must cover at least one charge"
            )));
        }

        let next_charge_utc = next_charge_after(now, existing.billing_interval());
        let subscription = self
            .store
            .approve_subscription(subscription_id, approved_amount, next_charge_utc, now)
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(anyhow::anyhow!(
                    "Subscription is no longer pending approval"
                ))
            })?;

        record_subscription_operation(&subscription.merchant_id.to_string(), "approved");
        tracing::info!(
            subscription_id = %subscription_id,
            next_charge_utc = %next_charge_utc,
            "Subscription approved"
        );

        Ok(subscription)
    }

    /// Any non-cancelled state -> cancelled. Terminal.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let existing = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if existing.status == SubscriptionStatus::Cancelled.as_str() {
            return Err(AppError::AlreadyCancelled(anyhow::anyhow!(
                "Subscription is already cancelled"
            )));
        }

        let subscription = self
            .store
            .cancel_subscription(subscription_id, now)
            .await?
            .ok_or_else(|| {
                AppError::AlreadyCancelled(anyhow::anyhow!("Subscription is already cancelled"))
            })?;

        record_subscription_operation(&subscription.merchant_id.to_string(), "cancelled");
        tracing::info!(subscription_id = %subscription_id, "Subscription cancelled");

        Ok(subscription)
    }

    /// active/past_due -> active. Advances the schedule exactly one interval
    /// from the previous scheduled time, never from the execution time, so a
    /// late charge does not drift the cadence.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn record_successful_charge(
        &self,
        subscription_id: Uuid,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let existing = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if !existing.subscription_status().is_scheduled() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Subscription is not scheduled for charges"
            )));
        }

        let anchor = existing.next_charge_utc.unwrap_or(now);
        let next_charge_utc = next_charge_after(anchor, existing.billing_interval());

        let subscription = self
            .store
            .record_charge_success(subscription_id, now, next_charge_utc)
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(anyhow::anyhow!(
                    "Subscription is no longer scheduled for charges"
                ))
            })?;

        record_subscription_operation(&subscription.merchant_id.to_string(), "charged");
        record_charge_amount(
            &subscription.merchant_id.to_string(),
            subscription.amount.to_f64().unwrap_or(0.0),
        );
        tracing::info!(
            subscription_id = %subscription_id,
            tx_hash = %tx_hash,
            charge_count = subscription.charge_count,
            next_charge_utc = ?subscription.next_charge_utc,
            "Charge recorded"
        );

        Ok(subscription)
    }

    /// active/past_due -> past_due. The schedule is kept so the next batch
    /// run retries the charge.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn record_failed_charge(
        &self,
        subscription_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let existing = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        if !existing.subscription_status().is_scheduled() {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Subscription is not scheduled for charges"
            )));
        }

        let subscription = self
            .store
            .record_charge_failure(subscription_id, reason, now)
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(anyhow::anyhow!(
                    "Subscription is no longer scheduled for charges"
                ))
            })?;

        record_subscription_operation(&subscription.merchant_id.to_string(), "past_due");
        tracing::warn!(
            subscription_id = %subscription_id,
            reason = %reason,
            "Charge failure recorded, subscription past due"
        );

        Ok(subscription)
    }
}
