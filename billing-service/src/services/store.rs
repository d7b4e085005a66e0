//! Abstract persistence gateway for the billing engine.
//!
//! Every write is a single-row operation; the conditional transition methods
//! are atomic compare-and-set updates, which is what serializes lifecycle
//! transitions and charge attempts per subscription. `None` from a
//! conditional method means the precondition did not hold (wrong state, not
//! due, lease held, or row missing) and nothing was written.

use crate::models::{
    BillingRun, BillingRunResult, BillingRunStatus, BillingRunType, CreateMerchant,
    CreateSubscription, ListBillingRunsFilter, ListSubscriptionsFilter, Merchant, RunResultStatus,
    Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Merchants
    async fn create_merchant(&self, input: &CreateMerchant) -> Result<Merchant, AppError>;
    async fn get_merchant(&self, merchant_id: Uuid) -> Result<Option<Merchant>, AppError>;

    // Subscriptions
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError>;
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;
    async fn list_subscriptions(
        &self,
        merchant_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>, AppError>;

    /// The scheduling selector: every subscription in a scheduled state
    /// (active or past_due) whose `next_charge_utc` has passed.
    async fn find_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError>;

    /// pending_approval -> active. Sets the approval ceiling and the first
    /// scheduled charge time.
    async fn approve_subscription(
        &self,
        subscription_id: Uuid,
        approved_amount: Decimal,
        next_charge_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError>;

    /// Any non-cancelled state -> cancelled. Sets `cancelled_utc`, clears
    /// the schedule.
    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError>;

    /// Claim the per-subscription charge lease: succeeds only when the
    /// subscription is due at `now` and no unexpired lease exists. The
    /// winning claimant is the only batch run allowed to attempt settlement
    /// until the lease is released or expires.
    async fn claim_charge(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError>;

    /// active/past_due -> active. Increments `charge_count`, advances the
    /// schedule, clears failure reason and lease.
    async fn record_charge_success(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        next_charge_utc: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError>;

    /// active/past_due -> past_due. Records the failure reason, keeps
    /// `next_charge_utc` so the next run retries, clears the lease.
    async fn record_charge_failure(
        &self,
        subscription_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError>;

    // Billing run ledger
    async fn create_billing_run(
        &self,
        run_type: BillingRunType,
        started_utc: DateTime<Utc>,
    ) -> Result<BillingRun, AppError>;
    async fn update_billing_run(
        &self,
        run_id: Uuid,
        status: BillingRunStatus,
        completed_utc: DateTime<Utc>,
        processed: i32,
        succeeded: i32,
        failed: i32,
        error_message: Option<String>,
    ) -> Result<Option<BillingRun>, AppError>;
    async fn get_billing_run(&self, run_id: Uuid) -> Result<Option<BillingRun>, AppError>;
    async fn list_billing_runs(
        &self,
        filter: &ListBillingRunsFilter,
    ) -> Result<Vec<BillingRun>, AppError>;
    async fn create_billing_run_result(
        &self,
        run_id: Uuid,
        subscription_id: Uuid,
        status: RunResultStatus,
        tx_hash: Option<String>,
        error_message: Option<String>,
    ) -> Result<BillingRunResult, AppError>;
    async fn get_billing_run_results(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<BillingRunResult>, AppError>;
}
