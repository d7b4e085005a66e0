//! In-memory backing for the billing store.
//!
//! Implements the same conditional-update contract as the PostgreSQL
//! backing, guarded by a single mutex so every write is atomic. Used by the
//! integration test harness and for dependency-free local runs
//! (`BILLING_STORE_BACKEND=memory`).

use crate::models::{
    BillingRun, BillingRunResult, BillingRunStatus, BillingRunType, CreateMerchant,
    CreateSubscription, ListBillingRunsFilter, ListSubscriptionsFilter, Merchant, RunResultStatus,
    Subscription, SubscriptionStatus,
};
use crate::services::store::BillingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    merchants: HashMap<Uuid, Merchant>,
    subscriptions: HashMap<Uuid, Subscription>,
    runs: HashMap<Uuid, BillingRun>,
    run_results: Vec<BillingRunResult>,
}

/// In-memory billing store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_scheduled(sub: &Subscription) -> bool {
    SubscriptionStatus::from_string(&sub.status).is_scheduled()
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_merchant(&self, input: &CreateMerchant) -> Result<Merchant, AppError> {
        input.validate()?;

        let merchant = Merchant {
            merchant_id: Uuid::new_v4(),
            business_name: input.business_name.clone(),
            wallet_address: input.wallet_address.clone(),
            created_utc: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        inner.merchants.insert(merchant.merchant_id, merchant.clone());
        Ok(merchant)
    }

    async fn get_merchant(&self, merchant_id: Uuid) -> Result<Option<Merchant>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.merchants.get(&merchant_id).cloned())
    }

    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        input.validate()?;

        let now = Utc::now();
        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            merchant_id: input.merchant_id,
            plan_name: input.plan_name.clone(),
            amount: input.amount,
            interval: input.interval.as_str().to_string(),
            customer_wallet: input.customer_wallet.clone(),
            customer_email: input.customer_email.clone(),
            status: SubscriptionStatus::PendingApproval.as_str().to_string(),
            approved_amount: None,
            charge_count: 0,
            next_charge_utc: None,
            last_charged_utc: None,
            last_failure_reason: None,
            charge_lease_utc: None,
            created_utc: now,
            cancelled_utc: None,
            updated_utc: now,
        };

        let mut inner = self.inner.lock().await;
        inner
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.subscriptions.get(&subscription_id).cloned())
    }

    async fn list_subscriptions(
        &self,
        merchant_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as usize;
        let status_str = filter.status.map(|s| s.as_str());

        let inner = self.inner.lock().await;
        let mut subscriptions: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.merchant_id == merchant_id)
            .filter(|s| status_str.is_none_or(|status| s.status == status))
            .filter(|s| {
                filter
                    .page_token
                    .is_none_or(|cursor| s.subscription_id > cursor)
            })
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.subscription_id);
        subscriptions.truncate(limit);
        Ok(subscriptions)
    }

    async fn find_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| is_scheduled(s))
            .filter(|s| s.next_charge_utc.is_some_and(|next| next <= now))
            .cloned()
            .collect())
    }

    async fn approve_subscription(
        &self,
        subscription_id: Uuid,
        approved_amount: Decimal,
        next_charge_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(sub) = inner.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        if sub.status != SubscriptionStatus::PendingApproval.as_str() {
            return Ok(None);
        }
        sub.status = SubscriptionStatus::Active.as_str().to_string();
        sub.approved_amount = Some(approved_amount);
        sub.next_charge_utc = Some(next_charge_utc);
        sub.updated_utc = now;
        Ok(Some(sub.clone()))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(sub) = inner.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        if sub.status == SubscriptionStatus::Cancelled.as_str() {
            return Ok(None);
        }
        sub.status = SubscriptionStatus::Cancelled.as_str().to_string();
        sub.cancelled_utc = Some(now);
        sub.next_charge_utc = None;
        sub.charge_lease_utc = None;
        sub.updated_utc = now;
        Ok(Some(sub.clone()))
    }

    async fn claim_charge(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(sub) = inner.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        let due = is_scheduled(sub) && sub.next_charge_utc.is_some_and(|next| next <= now);
        let unleased = sub.charge_lease_utc.is_none_or(|lease| lease < now);
        if !due || !unleased {
            return Ok(None);
        }
        sub.charge_lease_utc = Some(lease_until);
        sub.updated_utc = now;
        Ok(Some(sub.clone()))
    }

    async fn record_charge_success(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        next_charge_utc: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(sub) = inner.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        if !is_scheduled(sub) {
            return Ok(None);
        }
        sub.status = SubscriptionStatus::Active.as_str().to_string();
        sub.charge_count += 1;
        sub.last_charged_utc = Some(now);
        sub.next_charge_utc = Some(next_charge_utc);
        sub.last_failure_reason = None;
        sub.charge_lease_utc = None;
        sub.updated_utc = now;
        Ok(Some(sub.clone()))
    }

    async fn record_charge_failure(
        &self,
        subscription_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(sub) = inner.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        if !is_scheduled(sub) {
            return Ok(None);
        }
        sub.status = SubscriptionStatus::PastDue.as_str().to_string();
        sub.last_failure_reason = Some(reason.to_string());
        sub.charge_lease_utc = None;
        sub.updated_utc = now;
        Ok(Some(sub.clone()))
    }

    async fn create_billing_run(
        &self,
        run_type: BillingRunType,
        started_utc: DateTime<Utc>,
    ) -> Result<BillingRun, AppError> {
        let run = BillingRun {
            run_id: Uuid::new_v4(),
            run_type: run_type.as_str().to_string(),
            status: BillingRunStatus::Running.as_str().to_string(),
            started_utc,
            completed_utc: None,
            subscriptions_processed: 0,
            subscriptions_succeeded: 0,
            subscriptions_failed: 0,
            error_message: None,
        };

        let mut inner = self.inner.lock().await;
        inner.runs.insert(run.run_id, run.clone());
        Ok(run)
    }

    async fn update_billing_run(
        &self,
        run_id: Uuid,
        status: BillingRunStatus,
        completed_utc: DateTime<Utc>,
        processed: i32,
        succeeded: i32,
        failed: i32,
        error_message: Option<String>,
    ) -> Result<Option<BillingRun>, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return Ok(None);
        };
        run.status = status.as_str().to_string();
        run.completed_utc = Some(completed_utc);
        run.subscriptions_processed = processed;
        run.subscriptions_succeeded = succeeded;
        run.subscriptions_failed = failed;
        run.error_message = error_message;
        Ok(Some(run.clone()))
    }

    async fn get_billing_run(&self, run_id: Uuid) -> Result<Option<BillingRun>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.runs.get(&run_id).cloned())
    }

    async fn list_billing_runs(
        &self,
        filter: &ListBillingRunsFilter,
    ) -> Result<Vec<BillingRun>, AppError> {
        let limit = filter.page_size.clamp(1, 100) as usize;
        let status_str = filter.status.map(|s| s.as_str());
        let run_type_str = filter.run_type.map(|r| r.as_str());

        let inner = self.inner.lock().await;
        let mut runs: Vec<BillingRun> = inner
            .runs
            .values()
            .filter(|r| status_str.is_none_or(|status| r.status == status))
            .filter(|r| run_type_str.is_none_or(|run_type| r.run_type == run_type))
            .filter(|r| filter.page_token.is_none_or(|cursor| r.run_id > cursor))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.run_id);
        runs.truncate(limit);
        Ok(runs)
    }

    async fn create_billing_run_result(
        &self,
        run_id: Uuid,
        subscription_id: Uuid,
        status: RunResultStatus,
        tx_hash: Option<String>,
        error_message: Option<String>,
    ) -> Result<BillingRunResult, AppError> {
        let result = BillingRunResult {
            result_id: Uuid::new_v4(),
            run_id,
            subscription_id,
            status: status.as_str().to_string(),
            tx_hash,
            error_message,
            created_utc: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        inner.run_results.push(result.clone());
        Ok(result)
    }

    async fn get_billing_run_results(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<BillingRunResult>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .run_results
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }
}
