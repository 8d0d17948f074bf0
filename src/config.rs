// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the wellness gate service.
//!
//! Throttle presets default to the compile-time constants in
//! [`crate::limiter::presets`]; the binary may override them from the
//! environment.

use crate::limiter::{presets, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the wellness gate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Throttle configuration
    #[serde(default)]
    pub rate_limit: ThrottleConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Throttle presets and sweep schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Credential endpoints (default: 5 per 60s)
    #[serde(default = "default_auth")]
    pub auth: RateLimitConfig,

    /// LLM-backed endpoints (default: 10 per 60s)
    #[serde(default = "default_ai")]
    pub ai: RateLimitConfig,

    /// General reads and writes (default: 30 per 60s)
    #[serde(default = "default_api")]
    pub api: RateLimitConfig,

    /// Interval between background sweeps in seconds (default: 300)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Timestamps older than this are dropped by the sweep (default: 600)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_auth() -> RateLimitConfig {
    presets::AUTH
}

fn default_ai() -> RateLimitConfig {
    presets::AI
}

fn default_api() -> RateLimitConfig {
    presets::API
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_retention_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            rate_limit: ThrottleConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            auth: default_auth(),
            ai: default_ai(),
            api: default_api(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl ThrottleConfig {
    /// Get the sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get the sweep retention horizon
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Parse a `limit/window_secs` override such as `"30/60"`.
pub fn parse_preset(value: &str) -> Option<RateLimitConfig> {
    let (limit, window) = value.split_once('/')?;
    let limit: u32 = limit.trim().parse().ok()?;
    let window_secs: u64 = window.trim().parse().ok()?;
    if limit == 0 || window_secs == 0 {
        return None;
    }
    Some(RateLimitConfig { limit, window_secs })
}
