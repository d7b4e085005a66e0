//! Subscription creation and query tests for billing-service.

mod common;

use common::{CUSTOMER_WALLET, TestApp};
use serde_json::{Value, json};

#[tokio::test]
async fn create_subscription_starts_pending_with_no_schedule() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;

    assert_eq!(subscription["status"], "pending_approval");
    assert_eq!(subscription["charge_count"], 0);
    assert!(subscription["next_charge_utc"].is_null());
    assert!(subscription["approved_amount"].is_null());
    assert_eq!(subscription["interval"], "weekly");
    assert_eq!(subscription["customer_wallet"], CUSTOMER_WALLET);
}

#[tokio::test]
async fn create_subscription_rejects_nonpositive_amount() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    for amount in ["0", "-5"] {
        let response = app
            .client
            .post(format!("{}/subscriptions", app.address))
            .header("X-Merchant-ID", merchant_id.to_string())
            .json(&json!({
                "plan_name": "Starter Plan",
                "amount": amount,
                "interval": "weekly",
                "customer_wallet": CUSTOMER_WALLET,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 422, "amount {} should be rejected", amount);
    }
}

#[tokio::test]
async fn create_subscription_rejects_unknown_interval() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let response = app
        .client
        .post(format!("{}/subscriptions", app.address))
        .header("X-Merchant-ID", merchant_id.to_string())
        .json(&json!({
            "plan_name": "Starter Plan",
            "amount": "10",
            "interval": "daily",
            "customer_wallet": CUSTOMER_WALLET,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn create_subscription_rejects_malformed_wallet() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let response = app
        .client
        .post(format!("{}/subscriptions", app.address))
        .header("X-Merchant-ID", merchant_id.to_string())
        .json(&json!({
            "plan_name": "Starter Plan",
            "amount": "10",
            "interval": "weekly",
            "customer_wallet": "not-a-wallet",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn create_subscription_requires_merchant_header() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/subscriptions", app.address))
        .json(&json!({
            "plan_name": "Starter Plan",
            "amount": "10",
            "interval": "weekly",
            "customer_wallet": CUSTOMER_WALLET,
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn get_subscription_not_found() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let response = app
        .client
        .get(format!(
            "{}/subscriptions/00000000-0000-0000-0000-000000000000",
            app.address
        ))
        .header("X-Merchant-ID", merchant_id.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn subscriptions_are_scoped_to_the_owning_merchant() {
    let app = TestApp::spawn().await;
    let merchant_a = app.create_merchant().await;
    let merchant_b = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_a, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();

    let response = app
        .client
        .get(format!("{}/subscriptions/{}", app.address, subscription_id))
        .header("X-Merchant-ID", merchant_b.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn list_subscriptions_filters_by_status() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let first = app.create_subscription(merchant_id, "10", "weekly").await;
    app.create_subscription(merchant_id, "20", "monthly").await;

    app.approve_subscription(merchant_id, first["subscription_id"].as_str().unwrap(), "260")
        .await;

    let response = app
        .client
        .get(format!("{}/subscriptions", app.address))
        .header("X-Merchant-ID", merchant_id.to_string())
        .query(&[("status", "active")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let listed: Vec<Value> = response.json().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["subscription_id"], first["subscription_id"]);

    let response = app
        .client
        .get(format!("{}/subscriptions", app.address))
        .header("X-Merchant-ID", merchant_id.to_string())
        .query(&[("status", "paused")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}
