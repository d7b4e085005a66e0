//! Service layer for billing-service.

pub mod database;
pub mod engine;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod settlement;
pub mod store;

pub use database::Database;
pub use engine::BillingEngine;
pub use lifecycle::SubscriptionLifecycle;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use settlement::{HttpSettlementClient, SettlementClient, SettlementError};
pub use store::BillingStore;
