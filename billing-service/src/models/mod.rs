//! Domain models for billing-service.

mod billing_run;
mod merchant;
mod subscription;

pub use billing_run::{
    BillingRun, BillingRunResult, BillingRunStatus, BillingRunType, ListBillingRunsFilter,
    RunResultStatus,
};
pub use merchant::{CreateMerchant, Merchant};
pub use subscription::{
    BillingInterval, CreateSubscription, ListSubscriptionsFilter, Subscription,
    SubscriptionStatus, next_charge_after, validate_wallet_address,
};
