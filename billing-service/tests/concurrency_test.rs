//! Concurrency tests: overlapping batch runs must not double-charge.

mod common;

use chrono::Duration;
use common::{SettlementBehavior, StubSettlement, TestApp, parse_utc};
use serde_json::{Value, json};

#[tokio::test]
async fn overlapping_batch_runs_charge_at_most_once() {
    // Settlement is slow enough that both runs overlap on the same due
    // subscription; the charge lease lets exactly one attempt through.
    let settlement = StubSettlement::new(SettlementBehavior::SucceedAfter(
        std::time::Duration::from_millis(300),
    ));
    let app = TestApp::spawn_with(settlement).await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();
    let approved = app
        .approve_subscription(merchant_id, subscription_id, "260")
        .await;
    let as_of = parse_utc(&approved["next_charge_utc"]) + Duration::hours(1);

    let run_request = |client: reqwest::Client, address: String| async move {
        client
            .post(format!("{}/internal/billing/run", address))
            .bearer_auth(common::SCHEDULER_TOKEN)
            .json(&json!({ "as_of": as_of.to_rfc3339(), "run_type": "manual" }))
            .send()
            .await
            .expect("Failed to run batch")
            .json::<Value>()
            .await
            .expect("Invalid billing run body")
    };

    let (first, second) = tokio::join!(
        run_request(app.client.clone(), app.address.clone()),
        run_request(app.client.clone(), app.address.clone()),
    );

    let succeeded = first["run"]["subscriptions_succeeded"].as_i64().unwrap()
        + second["run"]["subscriptions_succeeded"].as_i64().unwrap();
    assert!(succeeded <= 1, "two overlapping runs both charged");

    let charged = app.get_subscription(merchant_id, subscription_id).await;
    assert_eq!(charged["charge_count"], 1);
    assert_eq!(app.settlement.calls(), 1);
}

#[tokio::test]
async fn sequential_runs_after_success_do_not_recharge() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();
    let approved = app
        .approve_subscription(merchant_id, subscription_id, "260")
        .await;
    let as_of = parse_utc(&approved["next_charge_utc"]) + Duration::hours(1);

    app.run_batch(as_of).await;
    let body = app.run_batch(as_of).await;

    // The schedule moved one interval forward, so the second run at the same
    // instant has nothing to do.
    assert_eq!(body["run"]["subscriptions_processed"], 0);

    let charged = app.get_subscription(merchant_id, subscription_id).await;
    assert_eq!(charged["charge_count"], 1);
    assert_eq!(app.settlement.calls(), 1);
}

#[tokio::test]
async fn charge_count_only_grows() {
    let app = TestApp::spawn().await;
    let merchant_id = app.create_merchant().await;

    let subscription = app.create_subscription(merchant_id, "10", "weekly").await;
    let subscription_id = subscription["subscription_id"].as_str().unwrap();
    let approved = app
        .approve_subscription(merchant_id, subscription_id, "260")
        .await;
    let scheduled = parse_utc(&approved["next_charge_utc"]);

    let mut last_count = 0i64;
    for cycle in 1i64..=3 {
        let as_of = scheduled + Duration::days(7 * (cycle - 1)) + Duration::hours(1);
        app.run_batch(as_of).await;

        let current = app.get_subscription(merchant_id, subscription_id).await;
        let count = current["charge_count"].as_i64().unwrap();
        assert!(count >= last_count);
        assert_eq!(count, cycle);
        last_count = count;
    }
}
