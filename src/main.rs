// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Wellness Gate Service
//!
//! Throttles API requests per client and gates journal and self-care
//! writes by subscription plan.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `RATE_LIMIT_AUTH`: Credential endpoint preset as `limit/window_secs` (default: 5/60)
//! - `RATE_LIMIT_AI`: LLM endpoint preset (default: 10/60)
//! - `RATE_LIMIT_API`: General endpoint preset (default: 30/60)
//! - `SWEEP_INTERVAL_SECS`: Seconds between throttle sweeps (default: 300)
//! - `METRICS_ENABLED`: Serve Prometheus metrics (default: true)

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wellness_gate::{
    config::{parse_preset, Config},
    handlers::{router, AppState},
    limiter::RateLimitConfig,
    store::MemoryUsageStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_config();
    info!(
        bind_addr = %config.bind_addr,
        auth = ?config.rate_limit.auth,
        ai = ?config.rate_limit.ai,
        api = ?config.rate_limit.api,
        sweep_interval_secs = config.rate_limit.sweep_interval_secs,
        "Starting wellness gate"
    );

    let store = Arc::new(MemoryUsageStore::new());
    let state = Arc::new(AppState::new(config.clone(), store)?);

    // Spawn sweep task
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_state.config.rate_limit.sweep_interval());
        loop {
            interval.tick().await;
            sweep_state.sweep(Utc::now()).await;
        }
    });

    let app = router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from environment variables.
fn load_config() -> Config {
    let defaults = Config::default();
    let mut rate_limit = defaults.rate_limit.clone();
    rate_limit.auth = preset_from_env("RATE_LIMIT_AUTH", rate_limit.auth);
    rate_limit.ai = preset_from_env("RATE_LIMIT_AI", rate_limit.ai);
    rate_limit.api = preset_from_env("RATE_LIMIT_API", rate_limit.api);
    rate_limit.sweep_interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(rate_limit.sweep_interval_secs);

    let mut metrics = defaults.metrics.clone();
    metrics.enabled = std::env::var("METRICS_ENABLED")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(metrics.enabled);

    Config {
        bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        rate_limit,
        metrics,
    }
}

fn preset_from_env(name: &str, default: RateLimitConfig) -> RateLimitConfig {
    match std::env::var(name) {
        Ok(value) => parse_preset(&value).unwrap_or_else(|| {
            warn!(var = name, value = %value, "Ignoring malformed rate limit preset");
            default
        }),
        Err(_) => default,
    }
}
