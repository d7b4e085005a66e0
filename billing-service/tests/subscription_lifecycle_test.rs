//! Subscription lifecycle integration tests for billing-service.

mod common;

use chrono::{Duration, Utc};
use common::{SCHEDULER_TOKEN, TestApp, parse_utc};
use serde_json::json;

#[tokio::test]
async fn approve_activates_and_schedules_one_interval_out() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();

    let before = Utc::now();
    let approved = app
        .approve_subscription(merchant_id, subscription_id, "260")
        .await;
    let after = Utc::now();

    assert_eq!(approved["status"], "active");
    assert_eq!(approved["approved_amount"], "260");

    let next_charge = parse_utc(&approved["next_charge_utc"]);
    assert!(next_charge >= before + Duration::days(7));
    assert!(next_charge <= after + Duration::days(7));
}

#[tokio::test]
async fn approve_monthly_schedules_one_calendar_month_out() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "50", "monthly").await;
    let approved = app
        .approve_subscription(
            merchant_id,
            subscription["subscription_id"].as_str().unwrap(),
            "600",
        )
        .await;

    let next_charge = parse_utc(&approved["next_charge_utc"]);
    let now = Utc::now();
    // One calendar month, not a fixed 30 days.
    assert!(next_charge > now + Duration::days(27));
    assert!(next_charge < now + Duration::days(32));
}

#[tokio::test]
async fn approve_rejects_ceiling_below_one_charge() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();

    let response = app
        .client
        .post(format!(
            "{}/subscriptions/{}/approve",
            app.address, subscription_id
        ))
        .header("X-Merchant-ID", merchant_id.to_string())
        .json(&json!({ "approved_amount": "5" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn approve_rejects_non_pending_subscription() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();

    app.approve_subscription(merchant_id, subscription_id, "260")
        .await;

    let response = app
        .client
        .post(format!(
            "{}/subscriptions/{}/approve",
            app.address, subscription_id
        ))
        .header("X-Merchant-ID", merchant_id.to_string())
        .json(&json!({ "approved_amount": "260" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn cancel_is_terminal_and_clears_schedule() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();
    app.approve_subscription(merchant_id, subscription_id, "260")
        .await;

    let response = app
        .client
        .post(format!(
            "{}/subscriptions/{}/cancel",
            app.address, subscription_id
        ))
        .header("X-Merchant-ID", merchant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let cancelled: serde_json::Value = response.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");
    assert!(cancelled["next_charge_utc"].is_null());
    assert!(!cancelled["cancelled_utc"].is_null());
}

#[tokio::test]
async fn second_cancel_fails_and_leaves_cancelled_utc_unchanged() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();

    let response = app
        .client
        .post(format!(
            "{}/subscriptions/{}/cancel",
            app.address, subscription_id
        ))
        .header("X-Merchant-ID", merchant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let first: serde_json::Value = response.json().await.unwrap();
    let cancelled_at = parse_utc(&first["cancelled_utc"]);

    let response = app
        .client
        .post(format!(
            "{}/subscriptions/{}/cancel",
            app.address, subscription_id
        ))
        .header("X-Merchant-ID", merchant_id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let fetched = app.get_subscription(merchant_id, subscription_id).await;
    assert_eq!(parse_utc(&fetched["cancelled_utc"]), cancelled_at);
}

#[tokio::test]
async fn charge_result_advances_schedule_from_previous_anchor() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();
    let approved = app
        .approve_subscription(merchant_id, subscription_id, "260")
        .await;
    let scheduled = parse_utc(&approved["next_charge_utc"]);

    let response = app
        .client
        .post(format!(
            "{}/internal/subscriptions/{}/charge-result",
            app.address, subscription_id
        ))
        .bearer_auth(SCHEDULER_TOKEN)
        .json(&json!({ "tx_hash": "0xabc123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let charged: serde_json::Value = response.json().await.unwrap();
    assert_eq!(charged["status"], "active");
    assert_eq!(charged["charge_count"], 1);
    assert!(!charged["last_charged_utc"].is_null());
    // Advanced exactly one interval from the previous scheduled time, not
    // from the execution time.
    assert_eq!(
        parse_utc(&charged["next_charge_utc"]),
        scheduled + Duration::days(7)
    );
}

#[tokio::test]
async fn past_due_keeps_schedule_and_records_reason() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();
    let approved = app
        .approve_subscription(merchant_id, subscription_id, "260")
        .await;
    let scheduled = parse_utc(&approved["next_charge_utc"]);

    let response = app
        .client
        .post(format!(
            "{}/internal/subscriptions/{}/past-due",
            app.address, subscription_id
        ))
        .bearer_auth(SCHEDULER_TOKEN)
        .json(&json!({ "reason": "insufficient allowance" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let past_due: serde_json::Value = response.json().await.unwrap();
    assert_eq!(past_due["status"], "past_due");
    assert_eq!(past_due["charge_count"], 0);
    assert_eq!(past_due["last_failure_reason"], "insufficient allowance");
    assert_eq!(parse_utc(&past_due["next_charge_utc"]), scheduled);
}

#[tokio::test]
async fn internal_lifecycle_routes_require_scheduler_token() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();

    let response = app
        .client
        .post(format!(
            "{}/internal/subscriptions/{}/charge-result",
            app.address, subscription_id
        ))
        .bearer_auth("wrong-token")
        .json(&json!({ "tx_hash": "0xabc123" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}
