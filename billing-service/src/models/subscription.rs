//! Subscription model.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingApproval,
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingApproval => "pending_approval",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Strict parse for boundary input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_approval" => Some(SubscriptionStatus::PendingApproval),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }

    /// Lossy conversion for stored rows, which are validated at write time.
    pub fn from_string(s: &str) -> Self {
        Self::parse(s).unwrap_or(SubscriptionStatus::PendingApproval)
    }

    /// A scheduled subscription carries a non-null `next_charge_utc` and is
    /// picked up by the due-scan.
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }
}

/// Billing interval between successive charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Weekly,
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Weekly => "weekly",
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    /// Strict parse for boundary input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekly" => Some(BillingInterval::Weekly),
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }

    /// Lossy conversion for stored rows, which are validated at write time.
    pub fn from_string(s: &str) -> Self {
        Self::parse(s).unwrap_or(BillingInterval::Monthly)
    }
}

/// Advance a scheduled charge time by one billing interval.
///
/// Weeks are a fixed seven days; months and years are calendar-aware so a
/// subscription approved on the 31st lands on the last day of shorter months
/// rather than drifting.
pub fn next_charge_after(from: DateTime<Utc>, interval: BillingInterval) -> DateTime<Utc> {
    match interval {
        BillingInterval::Weekly => from + Duration::days(7),
        BillingInterval::Monthly => from + Months::new(1),
        BillingInterval::Yearly => from + Months::new(12),
    }
}

/// Validate an on-chain wallet address: 0x-prefixed, 40 hex digits.
pub fn validate_wallet_address(address: &str) -> Result<(), AppError> {
    let hex = address.strip_prefix("0x").ok_or_else(|| {
        AppError::ValidationError(anyhow::anyhow!("Wallet address must start with 0x"))
    })?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "Wallet address must be 40 hex digits"
        )));
    }
    Ok(())
}

/// Subscription: a recurring billing agreement between a merchant and a
/// customer wallet.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
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
    pub charge_lease_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn billing_interval(&self) -> BillingInterval {
        BillingInterval::from_string(&self.interval)
    }

    pub fn subscription_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    /// Remaining pre-authorized headroom, derived from the approval ceiling
    /// and the count of successful charges. None until approval.
    pub fn remaining_approval(&self) -> Option<Decimal> {
        self.approved_amount
            .map(|ceiling| ceiling - self.amount * Decimal::from(self.charge_count))
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub merchant_id: Uuid,
    pub plan_name: String,
    pub amount: Decimal,
    pub interval: BillingInterval,
    pub customer_wallet: String,
    pub customer_email: Option<String>,
}

impl CreateSubscription {
    /// Validate the stored shape before the row is written.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.plan_name.trim().is_empty() {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Plan name must not be empty"
            )));
        }
        if self.amount <= Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Amount must be positive"
            )));
        }
        validate_wallet_address(&self.customer_wallet)?;
        Ok(())
    }
}

/// Filter parameters for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct ListSubscriptionsFilter {
    pub status: Option<SubscriptionStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
