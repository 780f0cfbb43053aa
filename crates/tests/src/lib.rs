//! Shared helpers for driving the HTTP router in integration tests.

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use axum::Router;
use expense_api::{build_router, build_state, ApiConfig};
use serde_json::Value;

pub async fn test_app() -> Result<Router> {
    test_app_with(ApiConfig::default()).await
}

pub async fn test_app_with(config: ApiConfig) -> Result<Router> {
    let state = build_state(&config).await?;
    Ok(build_router(state))
}

pub fn post_json(uri: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("valid request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

pub async fn read_json(response: Response<Body>) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&body).expect("body should be json")
}
