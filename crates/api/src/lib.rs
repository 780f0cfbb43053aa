mod rate_limit;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, Json, Path as AxumPath, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use expense_agents::{ExpenseAssistant, DEFAULT_REPORT_TTL_HOURS};
use expense_core::{Categorizer, Category, Expense, ExpenseError, PolicyTable, PolicyValidator};
use expense_observability::{AppMetrics, MetricsSnapshot};
use expense_storage::Store;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub use crate::rate_limit::{Admission, ClientRateLimiter};

const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_SUMMARIZE_EXPENSES: usize = 500;

/// Startup settings, read once from `EXPENSE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub policy_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub report_ttl_hours: i64,
    pub allowed_origins: Vec<String>,
    /// Key the rate limiter on `x-forwarded-for`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            policy_path: None,
            database_url: None,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 120,
            report_ttl_hours: DEFAULT_REPORT_TTL_HOURS,
            allowed_origins: default_allowed_origins(),
            trust_forwarded_for: false,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind: env::var("EXPENSE_BIND").unwrap_or(defaults.bind),
            policy_path: non_empty_env("EXPENSE_POLICY_PATH").map(PathBuf::from),
            database_url: non_empty_env("EXPENSE_DATABASE_URL"),
            rate_limit_window: parse_env::<u64>("EXPENSE_RATE_LIMIT_WINDOW_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: parse_env("EXPENSE_RATE_LIMIT_MAX").unwrap_or(defaults.rate_limit_max),
            report_ttl_hours: parse_env("EXPENSE_REPORT_TTL_HOURS")
                .unwrap_or(defaults.report_ttl_hours),
            allowed_origins: non_empty_env("EXPENSE_ALLOWED_ORIGINS")
                .map(|value| parse_origins(&value))
                .unwrap_or(defaults.allowed_origins),
            trust_forwarded_for: parse_env("EXPENSE_TRUST_PROXY")
                .unwrap_or(defaults.trust_forwarded_for),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<ExpenseAssistant<Store>>,
    pub metrics: Arc<AppMetrics>,
    pub limiter: ClientRateLimiter,
    pub trust_forwarded_for: bool,
    pub allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    policy_rules: usize,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    category: Option<String>,
    expense: Expense,
}

#[derive(Debug, Deserialize)]
struct SummarizeRequest {
    expenses: Vec<Expense>,
}

#[derive(Debug, Deserialize)]
struct RecordExpenseRequest {
    #[serde(default)]
    report_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    expense: Expense,
}

pub async fn build_app() -> Result<Router> {
    let state = build_state(&ApiConfig::from_env()).await?;
    Ok(build_router(state))
}

pub async fn build_state(config: &ApiConfig) -> Result<ApiState> {
    let metrics = AppMetrics::shared();
    let categorizer = Categorizer::standard();

    let table = match &config.policy_path {
        Some(path) => PolicyTable::from_toml_path(path)
            .with_context(|| format!("failed to load policy table from {}", path.display()))?,
        None => PolicyTable::standard(),
    };
    let validator = PolicyValidator::for_categorizer(table, &categorizer)
        .context("policy table does not cover every category")?;

    let store = match &config.database_url {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    let assistant = ExpenseAssistant::new(categorizer, validator, Arc::new(store), metrics.clone())
        .with_report_ttl(chrono::Duration::hours(config.report_ttl_hours));

    info!(
        policy_rules = assistant.policy().rules.len(),
        persistent = config.database_url.is_some(),
        trust_forwarded_for = config.trust_forwarded_for,
        "expense assistant ready"
    );

    Ok(ApiState {
        assistant: Arc::new(assistant),
        metrics,
        limiter: ClientRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        trust_forwarded_for: config.trust_forwarded_for,
        allowed_origins: Arc::new(config.allowed_origins.clone()),
    })
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/categorize", post(categorize))
        .route("/v1/validate", post(validate))
        .route("/v1/summarize", post(summarize))
        .route("/v1/reports/expenses", post(record_expense))
        .route("/v1/reports/{report_id}/summary", get(report_summary))
        .route("/v1/policy", get(policy))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        policy_rules: state.assistant.policy().rules.len(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn categorize(
    State(state): State<ApiState>,
    Json(expense): Json<Expense>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(state.assistant.categorize(&expense)))
}

async fn validate(
    State(state): State<ApiState>,
    Json(request): Json<ValidateRequest>,
) -> Response {
    let category = match request.category.as_deref() {
        Some(value) => match Category::parse(value) {
            Some(category) => Some(category),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_input",
                    format!("unknown category `{value}`"),
                )
            }
        },
        None => None,
    };

    match state.assistant.validate(&request.expense, category) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => engine_error_response(&error),
    }
}

async fn summarize(
    State(state): State<ApiState>,
    Json(request): Json<SummarizeRequest>,
) -> Response {
    if request.expenses.len() > MAX_SUMMARIZE_EXPENSES {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_input",
            format!("at most {MAX_SUMMARIZE_EXPENSES} expenses per request"),
        );
    }

    match state.assistant.summarize(request.expenses) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => engine_error_response(&error),
    }
}

async fn record_expense(
    State(state): State<ApiState>,
    Json(request): Json<RecordExpenseRequest>,
) -> Response {
    let report_id = request
        .report_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    match state
        .assistant
        .record_expense(report_id, request.user_id, request.expense)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => engine_error_response(&error),
    }
}

async fn report_summary(
    State(state): State<ApiState>,
    AxumPath(report_id): AxumPath<String>,
) -> Response {
    match state.assistant.report_summary(&report_id).await {
        Ok(Some(summary)) => (StatusCode::OK, Json(summary)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "report_not_found",
            format!("no report with id {report_id}"),
        ),
        Err(error) => engine_error_response(&error),
    }
}

async fn policy(State(state): State<ApiState>) -> Response {
    (StatusCode::OK, Json(state.assistant.policy())).into_response()
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into()
        })),
    )
        .into_response()
}

fn engine_error_response(error: &anyhow::Error) -> Response {
    match error.downcast_ref::<ExpenseError>() {
        Some(expense_error @ ExpenseError::InvalidInput(_)) => error_response(
            StatusCode::BAD_REQUEST,
            expense_error.code(),
            expense_error.to_string(),
        ),
        Some(expense_error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            expense_error.code(),
            expense_error.to_string(),
        ),
        None => {
            error!(error = ?error, "request failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-request-id"),
        ])
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let client = client_key(&request, state.trust_forwarded_for);
    if let Admission::Limited { retry_after } = state.limiter.check(&client) {
        warn!(client = %client, "rate limited");
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded for this client",
        );
        // Round up so clients never retry inside the window.
        let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    next.run(request).await
}

/// The peer address, or the first `x-forwarded-for` hop when the proxy is
/// trusted. Requests without either share the `unknown` bucket.
fn client_key(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| request.headers().get("x-forwarded-for"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_allowed_origins() -> Vec<String> {
    ["http://localhost:3000", "http://127.0.0.1:3000"]
        .iter()
        .map(|value| value.to_string())
        .collect()
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    non_empty_env(name).and_then(|value| value.parse::<T>().ok())
}
