//! Batch runner and charge executor.
//!
//! One `run_batch` call charges every currently due subscription, isolating
//! failures per subscription. Double-charging across overlapping runs is
//! prevented by the store-level charge lease, not by anything here.

use crate::models::{
    BillingRun, BillingRunResult, BillingRunStatus, BillingRunType, RunResultStatus, Subscription,
};
use crate::services::lifecycle::SubscriptionLifecycle;
use crate::services::metrics::{record_billing_run, record_charge_attempt, record_error};
use crate::services::settlement::{SettlementClient, SettlementError, TransferRequest};
use crate::services::store::BillingStore;
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Outcome of a single charge attempt.
#[derive(Debug)]
pub struct ChargeOutcome {
    pub subscription_id: Uuid,
    pub status: RunResultStatus,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
}

pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    settlement: Arc<dyn SettlementClient>,
    lifecycle: SubscriptionLifecycle,
    settlement_timeout: std::time::Duration,
    charge_lease: Duration,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        settlement: Arc<dyn SettlementClient>,
        lifecycle: SubscriptionLifecycle,
        settlement_timeout_secs: u64,
        charge_lease_secs: i64,
    ) -> Self {
        Self {
            store,
            settlement,
            lifecycle,
            settlement_timeout: std::time::Duration::from_secs(settlement_timeout_secs),
            charge_lease: Duration::seconds(charge_lease_secs),
        }
    }

    /// Run one batch over every subscription due at `now`.
    ///
    /// Skipped subscriptions (lost lease races) are recorded but not counted
    /// as processed; a run with any failed charge finalizes as `failed`.
    #[instrument(skip(self), fields(run_type = run_type.as_str()))]
    pub async fn run_batch(
        &self,
        now: DateTime<Utc>,
        run_type: BillingRunType,
    ) -> Result<(BillingRun, Vec<BillingRunResult>), AppError> {
        let run = self.store.create_billing_run(run_type, now).await?;
        let due = self.store.find_due_subscriptions(now).await?;

        tracing::info!(
            run_id = %run.run_id,
            due = due.len(),
            "Billing run started"
        );

        let mut processed = 0i32;
        let mut succeeded = 0i32;
        let mut failed = 0i32;
        let mut results = Vec::with_capacity(due.len());

        for subscription in &due {
            let outcome = self.charge_subscription(subscription, now).await;
            match outcome.status {
                RunResultStatus::Success => {
                    processed += 1;
                    succeeded += 1;
                }
                RunResultStatus::Failed => {
                    processed += 1;
                    failed += 1;
                }
                RunResultStatus::Skipped => {}
            }
            record_charge_attempt(outcome.status.as_str());

            match self
                .store
                .create_billing_run_result(
                    run.run_id,
                    outcome.subscription_id,
                    outcome.status,
                    outcome.tx_hash,
                    outcome.error_message,
                )
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => {
                    record_error("store", "create_billing_run_result");
                    tracing::error!(
                        run_id = %run.run_id,
                        subscription_id = %outcome.subscription_id,
                        error = %e,
                        "Failed to record billing run result"
                    );
                }
            }
        }

        let status = if failed > 0 {
            BillingRunStatus::Failed
        } else {
            BillingRunStatus::Completed
        };
        let error_message =
            (failed > 0).then(|| format!("{} of {} charge attempts failed", failed, processed));

        let run = self
            .store
            .update_billing_run(
                run.run_id,
                status,
                Utc::now(),
                processed,
                succeeded,
                failed,
                error_message,
            )
            .await?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Billing run disappeared during update"))
            })?;

        record_billing_run(run_type.as_str(), status.as_str());
        tracing::info!(
            run_id = %run.run_id,
            processed = processed,
            succeeded = succeeded,
            failed = failed,
            "Billing run finished"
        );

        Ok((run, results))
    }

    /// Execute one charge attempt against a due subscription.
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    pub async fn charge_subscription(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> ChargeOutcome {
        let subscription_id = subscription.subscription_id;

        let claimed = match self
            .store
            .claim_charge(subscription_id, now, now + self.charge_lease)
            .await
        {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    "Charge lease unavailable, skipping"
                );
                return ChargeOutcome {
                    subscription_id,
                    status: RunResultStatus::Skipped,
                    tx_hash: None,
                    error_message: Some("charge attempt already in flight".to_string()),
                };
            }
            Err(e) => {
                record_error("store", "claim_charge");
                return ChargeOutcome {
                    subscription_id,
                    status: RunResultStatus::Failed,
                    tx_hash: None,
                    error_message: Some(e.to_string()),
                };
            }
        };

        // One more charge must fit under the approval ceiling; settlement
        // would reject it on-chain anyway, so fail without the round trip.
        if let Some(remaining) = claimed.remaining_approval() {
            if remaining < claimed.amount {
                return self
                    .fail_charge(&claimed, "approved amount exhausted", now)
                    .await;
            }
        }

        let merchant = match self.store.get_merchant(claimed.merchant_id).await {
            Ok(Some(merchant)) => merchant,
            Ok(None) => {
                return self
                    .fail_charge(&claimed, "merchant record missing", now)
                    .await;
            }
            Err(e) => {
                record_error("store", "get_merchant");
                return ChargeOutcome {
                    subscription_id,
                    status: RunResultStatus::Failed,
                    tx_hash: None,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let request = TransferRequest {
            attempt_token: Uuid::new_v4(),
            customer_wallet: claimed.customer_wallet.clone(),
            merchant_wallet: merchant.wallet_address.clone(),
            amount: claimed.amount,
        };

        // A transfer that outlives the timeout is ambiguous, and ambiguous
        // outcomes are never recorded as success.
        let transfer = match tokio::time::timeout(
            self.settlement_timeout,
            self.settlement.transfer(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SettlementError::Timeout),
        };

        match transfer {
            Ok(receipt) => {
                match self
                    .lifecycle
                    .record_successful_charge(subscription_id, &receipt.tx_hash, now)
                    .await
                {
                    Ok(_) => ChargeOutcome {
                        subscription_id,
                        status: RunResultStatus::Success,
                        tx_hash: Some(receipt.tx_hash),
                        error_message: None,
                    },
                    Err(e) => {
                        record_error("store", "record_charge_success");
                        tracing::error!(
                            subscription_id = %subscription_id,
                            tx_hash = %receipt.tx_hash,
                            error = %e,
                            "Settled but failed to record charge"
                        );
                        ChargeOutcome {
                            subscription_id,
                            status: RunResultStatus::Failed,
                            tx_hash: Some(receipt.tx_hash),
                            error_message: Some(e.to_string()),
                        }
                    }
                }
            }
            Err(err) => self.fail_charge(&claimed, &err.to_string(), now).await,
        }
    }

    async fn fail_charge(
        &self,
        subscription: &Subscription,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ChargeOutcome {
        if let Err(e) = self
            .lifecycle
            .record_failed_charge(subscription.subscription_id, reason, now)
            .await
        {
            record_error("store", "record_charge_failure");
            tracing::error!(
                subscription_id = %subscription.subscription_id,
                error = %e,
                "Failed to record charge failure"
            );
        }

        ChargeOutcome {
            subscription_id: subscription.subscription_id,
            status: RunResultStatus::Failed,
            tx_hash: None,
            error_message: Some(reason.to_string()),
        }
    }
}
