//! PostgreSQL backing for the billing store.

use crate::models::{
    BillingRun, BillingRunResult, BillingRunStatus, BillingRunType, CreateMerchant,
    CreateSubscription, ListBillingRunsFilter, ListSubscriptionsFilter, Merchant, RunResultStatus,
    Subscription,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::BillingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, merchant_id, plan_name, amount, interval, customer_wallet, customer_email, status, approved_amount, charge_count, next_charge_utc, last_charged_utc, last_failure_reason, charge_lease_utc, created_utc, cancelled_utc, updated_utc";

const BILLING_RUN_COLUMNS: &str = "run_id, run_type, status, started_utc, completed_utc, subscriptions_processed, subscriptions_succeeded, subscriptions_failed, error_message";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Merchant Operations
    // =========================================================================

    #[instrument(skip(self, input))]
    async fn create_merchant(&self, input: &CreateMerchant) -> Result<Merchant, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_merchant"])
            .start_timer();

        let merchant_id = Uuid::new_v4();
        let merchant = sqlx::query_as::<_, Merchant>(
            r#"
            INSERT INTO merchants (merchant_id, business_name, wallet_address)
            VALUES ($1, $2, $3)
            RETURNING merchant_id, business_name, wallet_address, created_utc
            "#,
        )
        .bind(merchant_id)
        .bind(&input.business_name)
        .bind(&input.wallet_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create merchant: {}", e)))?;

        timer.observe_duration();
        info!(merchant_id = %merchant.merchant_id, "Merchant created");

        Ok(merchant)
    }

    #[instrument(skip(self), fields(merchant_id = %merchant_id))]
    async fn get_merchant(&self, merchant_id: Uuid) -> Result<Option<Merchant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_merchant"])
            .start_timer();

        let merchant = sqlx::query_as::<_, Merchant>(
            r#"
            SELECT merchant_id, business_name, wallet_address, created_utc
            FROM merchants
            WHERE merchant_id = $1
            "#,
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get merchant: {}", e)))?;

        timer.observe_duration();

        Ok(merchant)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(merchant_id = %input.merchant_id))]
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let subscription_id = Uuid::new_v4();
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, merchant_id, plan_name, amount, interval, customer_wallet, customer_email, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending_approval')
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(input.merchant_id)
        .bind(&input.plan_name)
        .bind(input.amount)
        .bind(input.interval.as_str())
        .bind(&input.customer_wallet)
        .bind(&input.customer_email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Subscription created");

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, filter), fields(merchant_id = %merchant_id))]
    async fn list_subscriptions(
        &self,
        merchant_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let subscriptions = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Subscription>(&format!(
                r#"
                SELECT {SUBSCRIPTION_COLUMNS}
                FROM subscriptions
                WHERE merchant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND subscription_id > $3
                ORDER BY subscription_id
                LIMIT $4
                "#,
            ))
            .bind(merchant_id)
            .bind(&status_str)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Subscription>(&format!(
                r#"
                SELECT {SUBSCRIPTION_COLUMNS}
                FROM subscriptions
                WHERE merchant_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                ORDER BY subscription_id
                LIMIT $3
                "#,
            ))
            .bind(merchant_id)
            .bind(&status_str)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    #[instrument(skip(self))]
    async fn find_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_due_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE status IN ('active', 'past_due')
              AND next_charge_utc <= $1
            "#,
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find due subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn approve_subscription(
        &self,
        subscription_id: Uuid,
        approved_amount: Decimal,
        next_charge_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'active', approved_amount = $2, next_charge_utc = $3, updated_utc = $4
            WHERE subscription_id = $1 AND status = 'pending_approval'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(approved_amount)
        .bind(next_charge_utc)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to approve subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_utc = $2, next_charge_utc = NULL,
                charge_lease_utc = NULL, updated_utc = $2
            WHERE subscription_id = $1 AND status <> 'cancelled'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn claim_charge(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_charge"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET charge_lease_utc = $3, updated_utc = $2
            WHERE subscription_id = $1
              AND status IN ('active', 'past_due')
              AND next_charge_utc <= $2
              AND (charge_lease_utc IS NULL OR charge_lease_utc < $2)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(now)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to claim charge: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn record_charge_success(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        next_charge_utc: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_charge_success"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'active', charge_count = charge_count + 1, last_charged_utc = $2,
                next_charge_utc = $3, last_failure_reason = NULL, charge_lease_utc = NULL,
                updated_utc = $2
            WHERE subscription_id = $1 AND status IN ('active', 'past_due')
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(now)
        .bind(next_charge_utc)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record charge success: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn record_charge_failure(
        &self,
        subscription_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_charge_failure"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'past_due', last_failure_reason = $3, charge_lease_utc = NULL,
                updated_utc = $2
            WHERE subscription_id = $1 AND status IN ('active', 'past_due')
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(now)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record charge failure: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    // =========================================================================
    // Billing Run Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn create_billing_run(
        &self,
        run_type: BillingRunType,
        started_utc: DateTime<Utc>,
    ) -> Result<BillingRun, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_billing_run"])
            .start_timer();

        let run_id = Uuid::new_v4();
        let run = sqlx::query_as::<_, BillingRun>(&format!(
            r#"
            INSERT INTO billing_runs (run_id, run_type, started_utc)
            VALUES ($1, $2, $3)
            RETURNING {BILLING_RUN_COLUMNS}
            "#,
        ))
        .bind(run_id)
        .bind(run_type.as_str())
        .bind(started_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create billing run: {}", e))
        })?;

        timer.observe_duration();

        Ok(run)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
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
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_billing_run"])
            .start_timer();

        let run = sqlx::query_as::<_, BillingRun>(&format!(
            r#"
            UPDATE billing_runs
            SET status = $2, completed_utc = $3, subscriptions_processed = $4,
                subscriptions_succeeded = $5, subscriptions_failed = $6, error_message = $7
            WHERE run_id = $1
            RETURNING {BILLING_RUN_COLUMNS}
            "#,
        ))
        .bind(run_id)
        .bind(status.as_str())
        .bind(completed_utc)
        .bind(processed)
        .bind(succeeded)
        .bind(failed)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update billing run: {}", e))
        })?;

        timer.observe_duration();

        Ok(run)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn get_billing_run(&self, run_id: Uuid) -> Result<Option<BillingRun>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_billing_run"])
            .start_timer();

        let run = sqlx::query_as::<_, BillingRun>(&format!(
            r#"
            SELECT {BILLING_RUN_COLUMNS}
            FROM billing_runs
            WHERE run_id = $1
            "#,
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get billing run: {}", e)))?;

        timer.observe_duration();

        Ok(run)
    }

    #[instrument(skip(self, filter))]
    async fn list_billing_runs(
        &self,
        filter: &ListBillingRunsFilter,
    ) -> Result<Vec<BillingRun>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_billing_runs"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());
        let run_type_str = filter.run_type.map(|r| r.as_str().to_string());

        let runs = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, BillingRun>(&format!(
                r#"
                SELECT {BILLING_RUN_COLUMNS}
                FROM billing_runs
                WHERE ($1::varchar IS NULL OR status = $1)
                  AND ($2::varchar IS NULL OR run_type = $2)
                  AND run_id > $3
                ORDER BY run_id
                LIMIT $4
                "#,
            ))
            .bind(&status_str)
            .bind(&run_type_str)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, BillingRun>(&format!(
                r#"
                SELECT {BILLING_RUN_COLUMNS}
                FROM billing_runs
                WHERE ($1::varchar IS NULL OR status = $1)
                  AND ($2::varchar IS NULL OR run_type = $2)
                ORDER BY run_id
                LIMIT $3
                "#,
            ))
            .bind(&status_str)
            .bind(&run_type_str)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list billing runs: {}", e))
        })?;

        timer.observe_duration();

        Ok(runs)
    }

    #[instrument(skip(self), fields(run_id = %run_id, subscription_id = %subscription_id))]
    async fn create_billing_run_result(
        &self,
        run_id: Uuid,
        subscription_id: Uuid,
        status: RunResultStatus,
        tx_hash: Option<String>,
        error_message: Option<String>,
    ) -> Result<BillingRunResult, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_billing_run_result"])
            .start_timer();

        let result_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, BillingRunResult>(
            r#"
            INSERT INTO billing_run_results (result_id, run_id, subscription_id, status, tx_hash, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING result_id, run_id, subscription_id, status, tx_hash, error_message, created_utc
            "#,
        )
        .bind(result_id)
        .bind(run_id)
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create billing run result: {}", e))
        })?;

        timer.observe_duration();

        Ok(result)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn get_billing_run_results(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<BillingRunResult>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_billing_run_results"])
            .start_timer();

        let results = sqlx::query_as::<_, BillingRunResult>(
            r#"
            SELECT result_id, run_id, subscription_id, status, tx_hash, error_message, created_utc
            FROM billing_run_results
            WHERE run_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get billing run results: {}", e))
        })?;

        timer.observe_duration();

        Ok(results)
    }
}
