// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for throttle and entitlement decisions.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    throttle_decisions: IntCounterVec,
    feature_checks: IntCounterVec,
    tracked_keys: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let throttle_decisions = IntCounterVec::new(
            Opts::new("throttle_decisions_total", "Throttle decisions by endpoint class"),
            &["prefix", "outcome"],
        )?;
        let feature_checks = IntCounterVec::new(
            Opts::new("feature_checks_total", "Entitlement checks by feature"),
            &["feature", "outcome"],
        )?;
        let tracked_keys = IntGauge::new(
            "throttle_tracked_keys",
            "Keys held by the throttle after the last sweep",
        )?;

        registry.register(Box::new(throttle_decisions.clone()))?;
        registry.register(Box::new(feature_checks.clone()))?;
        registry.register(Box::new(tracked_keys.clone()))?;

        Ok(Self {
            registry,
            throttle_decisions,
            feature_checks,
            tracked_keys,
        })
    }

    pub fn record_throttle(&self, prefix: &str, allowed: bool) {
        self.throttle_decisions
            .with_label_values(&[prefix, outcome(allowed)])
            .inc();
    }

    pub fn record_feature_check(&self, feature: &str, allowed: bool) {
        self.feature_checks
            .with_label_values(&[feature, outcome(allowed)])
            .inc();
    }

    pub fn set_tracked_keys(&self, keys: usize) {
        self.tracked_keys.set(i64::try_from(keys).unwrap_or(i64::MAX));
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn outcome(allowed: bool) -> &'static str {
    if allowed {
        "allowed"
    } else {
        "denied"
    }
}
