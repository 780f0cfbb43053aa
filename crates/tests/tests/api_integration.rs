use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use expense_api::ApiConfig;
use expense_core::Decimal;
use expense_tests::{get, post_json, read_json, test_app, test_app_with};
use serde_json::{json, Value};
use tower::ServiceExt;

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(text) => text.parse().expect("decimal string"),
        Value::Number(number) => number.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

#[tokio::test]
async fn health_reports_metrics() {
    let app = test_app().await.expect("app should build");

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = read_json(response).await;
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["policy_rules"], 6);
    assert!(parsed["metrics"].get("requests_total").is_some());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_app().await.expect("app should build");

    let response = app.oneshot(get("/health")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn categorize_rideshare_with_alternatives() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/categorize",
            &json!({
                "description": "Uber from airport to hotel",
                "amount": 45
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = read_json(response).await;
    assert_eq!(parsed["category"], "transportation");
    assert_eq!(parsed["subcategory"], "rideshare");
    assert!((parsed["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    assert!(parsed["alternatives"]
        .as_array()
        .unwrap()
        .iter()
        .any(|alternative| alternative["category"] == "lodging"));
}

#[tokio::test]
async fn validate_rejects_negative_amount() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/validate",
            &json!({
                "category": "meals",
                "expense": { "description": "Refund", "amount": -10 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let parsed = read_json(response).await;
    assert_eq!(parsed["error"], "invalid_input");
}

#[tokio::test]
async fn validate_rejects_unknown_category() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/validate",
            &json!({
                "category": "yachts",
                "expense": { "description": "Boat", "amount": 10 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validate_lodging_over_nightly_limit() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/validate",
            &json!({
                "category": "lodging",
                "expense": {
                    "description": "Marriott downtown",
                    "amount": 350,
                    "metadata": { "nights": 1 }
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = read_json(response).await;
    assert_eq!(parsed["is_compliant"], false);
    assert_eq!(parsed["violations"].as_array().unwrap().len(), 1);
    assert!(parsed["required_documents"]
        .as_array()
        .unwrap()
        .iter()
        .any(|document| document == "hotel_receipt"));
}

#[tokio::test]
async fn summarize_trip_blocks_submission_on_violation() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/summarize",
            &json!({
                "expenses": [
                    { "description": "Hilton", "amount": 900, "metadata": { "nights": 3 } },
                    { "description": "Flight to Denver", "amount": 350 },
                    {
                        "description": "Client dinner",
                        "amount": 80,
                        "metadata": { "is_client_meal": true }
                    }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = read_json(response).await;
    assert_eq!(decimal(&parsed["total_amount"]), Decimal::from(1330));
    assert_eq!(parsed["expense_count"], 3);
    assert_eq!(parsed["violation_count"], 1);
    assert_eq!(parsed["ready_for_submission"], false);
    assert_eq!(decimal(&parsed["amount_by_category"]["lodging"]), Decimal::from(900));
}

#[tokio::test]
async fn recorded_expenses_build_a_report() {
    let app = test_app().await.expect("app should build");

    let first = app
        .clone()
        .oneshot(post_json(
            "/v1/reports/expenses",
            &json!({
                "user_id": "u-42",
                "expense": { "description": "Taxi to client office", "amount": 32.5 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = read_json(first).await;
    let report_id = first["report_id"].as_str().unwrap().to_string();
    assert_eq!(first["summary"]["expense_count"], 1);
    assert_eq!(first["summary"]["ready_for_submission"], true);

    let second = app
        .clone()
        .oneshot(post_json(
            "/v1/reports/expenses",
            &json!({
                "report_id": report_id,
                "expense": {
                    "description": "Team lunch",
                    "amount": 60,
                    "metadata": { "meal_type": "lunch" }
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = read_json(second).await;
    assert_eq!(second["report_id"], report_id.as_str());
    assert_eq!(second["record"]["categorization"]["category"], "meals");

    let summary = app
        .oneshot(get(&format!("/v1/reports/{report_id}/summary")))
        .await
        .unwrap();
    assert_eq!(summary.status(), StatusCode::OK);
    let summary = read_json(summary).await;
    assert_eq!(summary, second["summary"]);
    assert_eq!(summary["expense_count"], 2);
    assert_eq!(decimal(&summary["total_amount"]), Decimal::new(925, 1));
    assert_eq!(summary["ready_for_submission"], false);
}

#[tokio::test]
async fn unknown_report_is_not_found() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(get("/v1/reports/does-not-exist/summary"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let parsed = read_json(response).await;
    assert_eq!(parsed["error"], "report_not_found");
}

#[tokio::test]
async fn policy_lists_every_category() {
    let app = test_app().await.expect("app should build");

    let response = app.oneshot(get("/v1/policy")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = read_json(response).await;
    let categories = parsed["rules"]
        .as_array()
        .unwrap()
        .iter()
        .map(|rule| rule["category"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    for expected in [
        "transportation",
        "airfare",
        "lodging",
        "meals",
        "office_supplies",
        "other",
    ] {
        assert!(categories.iter().any(|category| category == expected));
    }
}

#[tokio::test]
async fn rate_limiter_returns_429_but_spares_health() {
    let app = test_app_with(ApiConfig {
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 2,
        ..ApiConfig::default()
    })
    .await
    .expect("app should build");

    let payload = json!({ "description": "Coffee", "amount": 4 });
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_json("/v1/categorize", &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let limited = app
        .clone()
        .oneshot(post_json("/v1/categorize", &payload))
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key("retry-after"));
    assert_eq!(read_json(limited).await["error"], "rate_limited");

    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = test_app().await.expect("app should build");

    let description = "x".repeat(70 * 1024);
    let body = json!({ "description": description, "amount": 1 }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/categorize")
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

fn categorize_from(forwarded_for: &str) -> Request<Body> {
    let mut request = post_json("/v1/categorize", &json!({ "description": "Coffee", "amount": 4 }));
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());
    request
}

#[tokio::test]
async fn forwarded_for_cannot_dodge_the_limit_without_a_trusted_proxy() {
    let app = test_app_with(ApiConfig {
        rate_limit_max: 1,
        ..ApiConfig::default()
    })
    .await
    .expect("app should build");

    let first = app.clone().oneshot(categorize_from("198.51.100.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let spoofed = app.oneshot(categorize_from("198.51.100.2")).await.unwrap();
    assert_eq!(spoofed.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_limits_each_forwarded_client() {
    let app = test_app_with(ApiConfig {
        rate_limit_max: 1,
        trust_forwarded_for: true,
        ..ApiConfig::default()
    })
    .await
    .expect("app should build");

    let first = app.clone().oneshot(categorize_from("198.51.100.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let other = app.clone().oneshot(categorize_from("198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    let repeat = app.oneshot(categorize_from("198.51.100.1")).await.unwrap();
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn amounts_beyond_the_ceiling_are_rejected() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/summarize",
            &json!({
                "expenses": [
                    { "description": "Ledger import", "amount": "79228162514264337593543950335" },
                    { "description": "Ledger import", "amount": "79228162514264337593543950335" }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "invalid_input");
}

#[tokio::test]
async fn summary_lists_numbered_warnings() {
    let app = test_app().await.expect("app should build");

    let response = app
        .oneshot(post_json(
            "/v1/summarize",
            &json!({
                "expenses": [
                    { "description": "Taxi to office", "amount": 20, "metadata": { "has_receipt": true } },
                    { "description": "Dinner downtown", "amount": 60 }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = read_json(response).await;
    let warnings = parsed["warnings"].as_array().unwrap();
    assert_eq!(warnings.len() as u64, parsed["warning_count"].as_u64().unwrap());
    assert!(warnings.iter().any(|warning| warning
        == "Expense #2: High meal expense should include business justification"));
}
