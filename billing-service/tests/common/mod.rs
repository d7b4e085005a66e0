//! Test helper module for billing-service integration tests.
//!
//! Spawns the application on a random port with the in-memory store and a
//! programmable stub settlement client, so the suite needs no external
//! services.

#![allow(dead_code)]

use async_trait::async_trait;
use billing_service::config::{
    BillingConfig, DatabaseConfig, SchedulerConfig, SettlementConfig, StoreBackend, StoreConfig,
};
use billing_service::services::settlement::{
    SettlementClient, SettlementError, SettlementReceipt, TransferRequest,
};
use billing_service::services::{BillingStore, MemoryStore};
use billing_service::startup::Application;
use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde_json::{Value, json};
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const SCHEDULER_TOKEN: &str = "test-scheduler-token";

pub const CUSTOMER_WALLET: &str = "0x00112233445566778899aabbccddeeff00112233";
pub const MERCHANT_WALLET: &str = "0xffeeddccbbaa99887766554433221100ffeeddcc";

/// Programmable settlement behavior for the stub client.
#[derive(Debug, Clone)]
pub enum SettlementBehavior {
    Succeed,
    InsufficientBalance,
    SucceedAfter(std::time::Duration),
}

/// Stub settlement client recording every transfer attempt.
pub struct StubSettlement {
    behavior: Mutex<SettlementBehavior>,
    calls: AtomicUsize,
}

impl StubSettlement {
    pub fn new(behavior: SettlementBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        })
    }

    pub async fn set_behavior(&self, behavior: SettlementBehavior) {
        *self.behavior.lock().await = behavior;
    }

    /// Number of transfer attempts that reached the settlement collaborator.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementClient for StubSettlement {
    async fn transfer(
        &self,
        _request: &TransferRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior.lock().await.clone();

        match behavior {
            SettlementBehavior::Succeed => Ok(SettlementReceipt {
                tx_hash: format!("0x{:064x}", attempt),
            }),
            SettlementBehavior::InsufficientBalance => Err(SettlementError::InsufficientBalance),
            SettlementBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(SettlementReceipt {
                    tx_hash: format!("0x{:064x}", attempt),
                })
            }
        }
    }
}

fn test_config() -> BillingConfig {
    BillingConfig {
        common: CoreConfig { port: 0 },
        service_name: "billing-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            database: DatabaseConfig {
                url: Secret::new("postgres://unused".to_string()),
                max_connections: 5,
                min_connections: 1,
            },
        },
        settlement: SettlementConfig {
            base_url: "http://127.0.0.1:0".to_string(),
            timeout_secs: 5,
        },
        scheduler: SchedulerConfig {
            token: Secret::new(SCHEDULER_TOKEN.to_string()),
            charge_lease_secs: 120,
        },
    }
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<dyn BillingStore>,
    pub settlement: Arc<StubSettlement>,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn a test application whose settlement calls always succeed.
    pub async fn spawn() -> Self {
        Self::spawn_with(StubSettlement::new(SettlementBehavior::Succeed)).await
    }

    /// Spawn a test application with the given stub settlement client.
    pub async fn spawn_with(settlement: Arc<StubSettlement>) -> Self {
        let store: Arc<dyn BillingStore> = Arc::new(MemoryStore::new());

        let app = Application::build_with(test_config(), store.clone(), settlement.clone())
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let address = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();

        // Wait for the server to come up.
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            settlement,
            client,
        }
    }

    /// Register a merchant through the operator surface, returning its id.
    pub async fn create_merchant(&self) -> Uuid {
        let response = self
            .client
            .post(format!("{}/merchants", self.address))
            .bearer_auth(SCHEDULER_TOKEN)
            .json(&json!({
                "business_name": "Test Merchant",
                "wallet_address": MERCHANT_WALLET,
            }))
            .send()
            .await
            .expect("Failed to create merchant");
        assert_eq!(response.status(), 201);

        let body: Value = response.json().await.expect("Invalid merchant body");
        body["merchant_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .expect("Missing merchant_id")
    }

    /// Create a subscription as the given merchant.
    pub async fn create_subscription(
        &self,
        merchant_id: Uuid,
        amount: &str,
        interval: &str,
    ) -> Value {
        let response = self
            .client
            .post(format!("{}/subscriptions", self.address))
            .header("X-Merchant-ID", merchant_id.to_string())
            .json(&json!({
                "plan_name": "Starter Plan",
                "amount": amount,
                "interval": interval,
                "customer_wallet": CUSTOMER_WALLET,
                "customer_email": "customer@example.com",
            }))
            .send()
            .await
            .expect("Failed to create subscription");
        assert_eq!(response.status(), 201);

        response.json().await.expect("Invalid subscription body")
    }

    /// Approve a subscription with the given spend ceiling.
    pub async fn approve_subscription(
        &self,
        merchant_id: Uuid,
        subscription_id: &str,
        approved_amount: &str,
    ) -> Value {
        let response = self
            .client
            .post(format!(
                "{}/subscriptions/{}/approve",
                self.address, subscription_id
            ))
            .header("X-Merchant-ID", merchant_id.to_string())
            .json(&json!({ "approved_amount": approved_amount }))
            .send()
            .await
            .expect("Failed to approve subscription");
        assert_eq!(response.status(), 200);

        response.json().await.expect("Invalid approval body")
    }

    /// Fetch a subscription as the given merchant.
    pub async fn get_subscription(&self, merchant_id: Uuid, subscription_id: &str) -> Value {
        let response = self
            .client
            .get(format!(
                "{}/subscriptions/{}",
                self.address, subscription_id
            ))
            .header("X-Merchant-ID", merchant_id.to_string())
            .send()
            .await
            .expect("Failed to get subscription");
        assert_eq!(response.status(), 200);

        response.json().await.expect("Invalid subscription body")
    }

    /// Trigger a billing batch as of the given instant.
    pub async fn run_batch(&self, as_of: DateTime<Utc>) -> Value {
        let response = self
            .client
            .post(format!("{}/internal/billing/run", self.address))
            .bearer_auth(SCHEDULER_TOKEN)
            .json(&json!({ "as_of": as_of.to_rfc3339(), "run_type": "manual" }))
            .send()
            .await
            .expect("Failed to run batch");
        assert_eq!(response.status(), 200);

        response.json().await.expect("Invalid billing run body")
    }
}

/// Parse an RFC-3339 timestamp out of a JSON response field.
pub fn parse_utc(value: &Value) -> DateTime<Utc> {
    let raw = value.as_str().expect("Expected timestamp string");
    DateTime::parse_from_rfc3339(raw)
        .expect("Invalid RFC-3339 timestamp")
        .with_timezone(&Utc)
}
