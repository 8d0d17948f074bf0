// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the wellness gate service.
//!
//! Every API route passes the throttle first, then resolves the caller
//! from the header injected by the upstream auth proxy. Gated writes
//! consult the entitlement evaluator before touching the store.

use crate::calendar;
use crate::config::Config;
use crate::entitlement::{
    Entitlements, Feature, FeatureAccess, Plan, UsageSummary, JOURNAL_LIMIT_REACHED,
    SELFCARE_LIMIT_REACHED,
};
use crate::error::{ApiSuccess, AppError, ErrorResponse, Result, RATE_LIMITED_MESSAGE};
use crate::limiter::{RateLimitConfig, RateLimitResult, Throttle};
use crate::metrics::Metrics;
use crate::store::{JournalEntry, SelfcareCompletion, Subscription, UsageStore};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Header carrying the authenticated user id, set by the auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity shared by every client that sends no forwarding headers.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Shared application state.
pub struct AppState {
    pub throttle: Throttle,
    pub entitlements: Entitlements,
    pub store: Arc<dyn UsageStore>,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn UsageStore>) -> prometheus::Result<Self> {
        Ok(Self {
            throttle: Throttle::in_memory(),
            entitlements: Entitlements::new(store.clone()),
            store,
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Run one throttle sweep and publish the surviving key count.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let removed = self
            .throttle
            .sweep(now, self.config.rate_limit.retention())
            .await;
        let tracked = self.throttle.tracked_keys();
        self.metrics.set_tracked_keys(tracked);
        debug!(removed, tracked, "Throttle sweep finished");
        removed
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct FeatureQuery {
    #[serde(default)]
    pub feature: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub plan: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default)]
    pub routine_type: Option<String>,
    #[serde(default)]
    pub routine_title: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<u32>,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/api/subscription/check", get(check_feature))
        .route("/api/subscription", get(get_subscription).post(change_plan))
        .route("/api/usage", get(usage))
        .route("/api/journal", post(create_journal))
        .route("/api/selfcare/complete", post(complete_selfcare));

    if state.config.metrics.enabled {
        let path = state.config.metrics.path.clone();
        router = router.route(&path, get(metrics));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Client network identity: first `x-forwarded-for` hop, then `x-real-ip`,
/// then the shared `unknown` bucket.
pub fn client_identity(headers: &HeaderMap) -> String {
    if let Some(first_hop) = header_str(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return first_hop.to_string();
    }

    header_str(headers, "x-real-ip")
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Throttle a request under `prefix:<client>`.
///
/// Returns the 429 response to send back, or `None` when the request may
/// proceed.
pub async fn rate_limit(
    state: &AppState,
    headers: &HeaderMap,
    config: &RateLimitConfig,
    prefix: &str,
) -> Option<Response> {
    let client = client_identity(headers);
    let key = format!("{prefix}:{client}");
    let now = Utc::now();

    let result = state.throttle.check_at(&key, config, now).await;
    state.metrics.record_throttle(prefix, result.is_allowed());

    match result {
        RateLimitResult::Allowed { remaining, .. } => {
            debug!(%key, remaining, "Request admitted");
            None
        }
        RateLimitResult::Limited { reset_at_ms } => {
            let wait_ms = (reset_at_ms - now.timestamp_millis()).max(0);
            let retry_after_secs = (wait_ms + 999) / 1000;
            info!(%key, retry_after_secs, "Request rate limited");
            Some(
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [
                        ("Retry-After", retry_after_secs.to_string()),
                        ("X-RateLimit-Limit", config.limit.to_string()),
                        ("X-RateLimit-Remaining", "0".to_string()),
                        ("X-RateLimit-Reset", reset_at_ms.to_string()),
                    ],
                    Json(ErrorResponse::new("RATE_LIMITED", RATE_LIMITED_MESSAGE)),
                )
                    .into_response(),
            )
        }
    }
}

fn require_user(headers: &HeaderMap) -> Result<String> {
    header_str(headers, USER_ID_HEADER)
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "wellness-gate",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /api/subscription/check?feature=<name>`
pub async fn check_feature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: std::result::Result<Query<FeatureQuery>, QueryRejection>,
) -> Result<Response> {
    if let Some(rejected) =
        rate_limit(&state, &headers, &state.config.rate_limit.api, "subscription").await
    {
        return Ok(rejected);
    }
    let user_id = require_user(&headers)?;

    let Query(query) = query.map_err(|err| AppError::Validation(err.body_text()))?;

    let feature: Feature = match query.feature.as_deref() {
        None | Some("") => {
            return Err(AppError::Validation("feature parameter is required".to_string()))
        }
        Some(raw) => raw.parse::<Feature>().map_err(|err| {
            warn!(feature = raw, "Unknown feature requested");
            AppError::Validation(format!("{err}"))
        })?,
    };

    let access: FeatureAccess = state.entitlements.check(&user_id, feature).await?;
    state
        .metrics
        .record_feature_check(feature.as_str(), access.allowed);
    Ok(ApiSuccess::json(access).into_response())
}

/// `GET /api/usage`
pub async fn usage(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    if let Some(rejected) =
        rate_limit(&state, &headers, &state.config.rate_limit.api, "usage").await
    {
        return Ok(rejected);
    }
    let user_id = require_user(&headers)?;

    let summary: UsageSummary = state.entitlements.usage(&user_id).await?;
    Ok(ApiSuccess::json(summary).into_response())
}

/// `GET /api/subscription`
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(rejected) =
        rate_limit(&state, &headers, &state.config.rate_limit.api, "subscription").await
    {
        return Ok(rejected);
    }
    let user_id = require_user(&headers)?;

    let subscription = match state.store.find_subscription(&user_id).await? {
        Some(subscription) => subscription,
        None => Subscription {
            user_id,
            plan: Plan::Free,
            start_date: Utc::now(),
            end_date: None,
        },
    };
    Ok(ApiSuccess::json(subscription).into_response())
}

/// `POST /api/subscription` with `{"plan": "free" | "premium"}`
pub async fn change_plan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<PlanRequest>, JsonRejection>,
) -> Result<Response> {
    if let Some(rejected) = rate_limit(
        &state,
        &headers,
        &state.config.rate_limit.auth,
        "subscription-change",
    )
    .await
    {
        return Ok(rejected);
    }
    let user_id = require_user(&headers)?;

    let Json(request) = payload.map_err(|err| AppError::Validation(err.body_text()))?;
    let plan = request
        .plan
        .parse::<Plan>()
        .map_err(|err| AppError::Validation(format!("{err}")))?;

    let subscription = state
        .store
        .upsert_subscription(&user_id, plan, Utc::now())
        .await?;
    info!(user_id = %user_id, %plan, "Plan changed");
    Ok(ApiSuccess::json(subscription).into_response())
}

/// `POST /api/journal`, gated by the weekly journal quota.
pub async fn create_journal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(rejected) =
        rate_limit(&state, &headers, &state.config.rate_limit.api, "journal").await
    {
        return Ok(rejected);
    }
    let user_id = require_user(&headers)?;
    let now = Utc::now();

    let access = state
        .entitlements
        .check_at(&user_id, Feature::Journal, now)
        .await?;
    state
        .metrics
        .record_feature_check(Feature::Journal.as_str(), access.allowed);
    if !access.allowed {
        return Err(AppError::Forbidden(
            access.message.unwrap_or(JOURNAL_LIMIT_REACHED),
        ));
    }

    let entry: JournalEntry = state
        .store
        .create_journal(&user_id, calendar::today(now), now)
        .await?;
    Ok(ApiSuccess::json(entry).into_response())
}

/// `POST /api/selfcare/complete`, gated by the daily self-care quota.
pub async fn complete_selfcare(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Response> {
    if let Some(rejected) =
        rate_limit(&state, &headers, &state.config.rate_limit.api, "selfcare").await
    {
        return Ok(rejected);
    }
    let user_id = require_user(&headers)?;
    let now = Utc::now();

    // A request without a JSON payload records the default routine.
    let request = match payload {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => CompletionRequest::default(),
        Err(err) => return Err(AppError::Validation(err.body_text())),
    };

    let access = state
        .entitlements
        .check_at(&user_id, Feature::Selfcare, now)
        .await?;
    state
        .metrics
        .record_feature_check(Feature::Selfcare.as_str(), access.allowed);
    if !access.allowed {
        return Err(AppError::Forbidden(
            access.message.unwrap_or(SELFCARE_LIMIT_REACHED),
        ));
    }

    let completion = state
        .store
        .record_selfcare_completion(SelfcareCompletion {
            user_id,
            routine_type: request
                .routine_type
                .unwrap_or_else(|| "breathing".to_string()),
            routine_title: request
                .routine_title
                .unwrap_or_else(|| "Self-care".to_string()),
            duration_sec: request.duration_sec.unwrap_or(0),
            date: calendar::today(now),
        })
        .await?;
    Ok(ApiSuccess::json(completion).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.insert(name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_forwarded_first_hop_wins() {
        let map = headers(&[
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_identity(&map), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_identity(&map), "198.51.100.2");
    }

    #[test]
    fn test_unknown_bucket_without_headers() {
        assert_eq!(client_identity(&HeaderMap::new()), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_require_user() {
        assert_eq!(
            require_user(&headers(&[(USER_ID_HEADER, "user-1")])).unwrap(),
            "user-1"
        );
        assert!(matches!(
            require_user(&headers(&[(USER_ID_HEADER, "  ")])),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            require_user(&HeaderMap::new()),
            Err(AppError::Unauthorized)
        ));
    }
}
