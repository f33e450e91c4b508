//! Admission HTTP handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{FailurePolicy, LimitsConfig};
use crate::error::GateError;
use crate::ratelimit::RateDecider;
use crate::tiers::{resolve_limit, subject_key, TenantTier};

/// State shared by every handler.
pub struct AppState {
    /// The configured decider
    pub decider: Arc<dyn RateDecider>,
    /// Default limit and window
    pub limits: LimitsConfig,
    /// Answer used when the decider's backend is unavailable
    pub failure_policy: FailurePolicy,
}

impl AppState {
    pub fn new(
        decider: Arc<dyn RateDecider>,
        limits: LimitsConfig,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            decider,
            limits,
            failure_policy,
        }
    }

    fn limit_for(&self, tenant_tier: Option<&str>, model_id: &str) -> u64 {
        let tenant = tenant_tier.and_then(|raw| match raw.parse::<TenantTier>() {
            Ok(tier) => Some(tier),
            Err(e) => {
                debug!(error = %e, "Ignoring tenant tier");
                None
            }
        });
        resolve_limit(tenant, Some(model_id), self.limits.default_limit)
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRequest {
    pub user_id: String,
    pub model_id: String,
    #[serde(default)]
    pub tenant_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowResponse {
    pub allowed: bool,
    pub user_id: String,
    pub model_id: String,
    pub requests_used: u64,
    pub requests_remaining: u64,
    pub limit: u64,
    pub window_seconds: f64,
    /// Set when the request was admitted by the fail-open policy.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub tenant_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub user_id: String,
    pub model_id: String,
    pub requests_used: u64,
    pub requests_remaining: i64,
    pub limit: u64,
    pub window_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
    pub user_id: String,
    pub model_id: String,
}

/// A `GateError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            GateError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GateError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Config(_) | GateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (self.status(), body).into_response()
    }
}

fn require_ids(user_id: &str, model_id: &str) -> Result<(), ApiError> {
    if user_id.is_empty() || model_id.is_empty() {
        warn!("Received request with empty user_id or model_id");
        let err = GateError::InvalidInput("user_id and model_id are required".to_string());
        return Err(err.into());
    }
    Ok(())
}

/// Decide whether one inference request may proceed.
///
/// 200 when admitted, 429 when the subject is over its limit. A backend
/// failure is answered according to the configured failure policy.
#[instrument(
    skip_all,
    fields(user_id = %request.user_id, model_id = %request.model_id)
)]
pub async fn allow(
    State(state): State<SharedState>,
    Json(request): Json<AllowRequest>,
) -> Result<(StatusCode, Json<AllowResponse>), ApiError> {
    require_ids(&request.user_id, &request.model_id)?;

    let limit = state.limit_for(request.tenant_tier.as_deref(), &request.model_id);
    let window = state.limits.window();
    let key = subject_key(&request.user_id, &request.model_id);

    let response = match state.decider.decide(&key, limit, window).await {
        Ok(decision) => AllowResponse {
            allowed: decision.allowed,
            user_id: request.user_id,
            model_id: request.model_id,
            requests_used: decision.used,
            requests_remaining: decision.remaining,
            limit,
            window_seconds: decision.window_seconds,
            degraded: false,
        },
        Err(e) if e.is_backend_unavailable() && state.failure_policy == FailurePolicy::Open => {
            warn!(error = %e, "Backend unavailable, admitting under fail-open policy");
            AllowResponse {
                allowed: true,
                user_id: request.user_id,
                model_id: request.model_id,
                requests_used: 0,
                requests_remaining: limit,
                limit,
                window_seconds: window.as_secs_f64(),
                degraded: true,
            }
        }
        Err(e) => return Err(e.into()),
    };

    let status = if response.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };

    info!(allowed = response.allowed, limit = limit, "Admission decision made");
    Ok((status, Json(response)))
}

/// Current usage for a `(user, model)` pair.
pub async fn usage(
    State(state): State<SharedState>,
    Path((user_id, model_id)): Path<(String, String)>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, ApiError> {
    require_ids(&user_id, &model_id)?;

    let limit = state.limit_for(query.tenant_tier.as_deref(), &model_id);
    let key = subject_key(&user_id, &model_id);
    let usage = state.decider.usage(&key, limit, state.limits.window()).await?;

    Ok(Json(UsageResponse {
        user_id,
        model_id,
        requests_used: usage.used,
        requests_remaining: usage.remaining,
        limit,
        window_seconds: usage.window_seconds,
    }))
}

/// Clear the window for a `(user, model)` pair.
pub async fn reset(
    State(state): State<SharedState>,
    Path((user_id, model_id)): Path<(String, String)>,
) -> Result<Json<ResetResponse>, ApiError> {
    require_ids(&user_id, &model_id)?;

    state.decider.reset(&subject_key(&user_id, &model_id)).await?;
    info!(user_id = %user_id, model_id = %model_id, "Usage reset");

    Ok(Json(ResetResponse {
        status: "reset".to_string(),
        user_id,
        model_id,
    }))
}

/// Liveness probe.
pub async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "backend": state.decider.name(),
    }))
}

/// All routes bound to `state`.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/allow", post(allow))
        .route("/usage/{user_id}/{model_id}", get(usage).delete(reset))
        .route("/health", get(health))
        .with_state(state)
}
