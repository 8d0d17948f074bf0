// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding window request throttle.
//!
//! Each key (endpoint class + client identity) keeps the admission
//! timestamps that fall inside the trailing window. A request is admitted
//! while fewer than `limit` timestamps remain; on rejection the reset time
//! is the moment the oldest surviving timestamp leaves the window.
//!
//! Stale keys are reclaimed by [`Throttle::sweep`], which the host runs on
//! its own schedule, never from the check path.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Limit and window for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per window
    pub limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Built-in endpoint classes.
pub mod presets {
    use super::RateLimitConfig;

    /// Credential endpoints: 5 requests per 60 seconds
    pub const AUTH: RateLimitConfig = RateLimitConfig::new(5, 60);
    /// LLM-backed endpoints: 10 requests per 60 seconds
    pub const AI: RateLimitConfig = RateLimitConfig::new(10, 60);
    /// General API endpoints: 30 requests per 60 seconds
    pub const API: RateLimitConfig = RateLimitConfig::new(30, 60);
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is admitted
    Allowed {
        /// Remaining admissions in the current window
        remaining: u32,
        /// Epoch milliseconds at which this admission leaves the window
        reset_at_ms: i64,
    },
    /// Request is rejected
    Limited {
        /// Epoch milliseconds at which the next slot frees up
        reset_at_ms: i64,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allowed { remaining, .. } => *remaining,
            Self::Limited { .. } => 0,
        }
    }

    pub fn reset_at_ms(&self) -> i64 {
        match self {
            Self::Allowed { reset_at_ms, .. } | Self::Limited { reset_at_ms } => *reset_at_ms,
        }
    }
}

/// Keyed timestamp storage used by the throttle.
///
/// Implementations only need plain get/set/delete semantics; the throttle
/// serializes read-modify-write sequences itself.
pub trait RateLimitStore: Send + Sync {
    /// Timestamps (epoch ms) recorded for `key`, oldest first.
    fn get(&self, key: &str) -> Option<Vec<i64>>;

    fn set(&self, key: &str, timestamps: Vec<i64>);

    fn delete(&self, key: &str);

    /// Snapshot of all tracked keys.
    fn keys(&self) -> Vec<String>;
}

/// Process-local store. Does not survive restarts.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, Vec<i64>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn get(&self, key: &str) -> Option<Vec<i64>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, timestamps: Vec<i64>) {
        self.entries.insert(key.to_string(), timestamps);
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Thread-safe sliding window throttle.
pub struct Throttle<S = MemoryRateLimitStore> {
    store: S,
    /// Makes each read/filter/compare/append sequence atomic
    guard: Mutex<()>,
}

impl Throttle<MemoryRateLimitStore> {
    /// Create a throttle backed by the in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryRateLimitStore::new())
    }
}

impl<S: RateLimitStore> Throttle<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            guard: Mutex::new(()),
        }
    }

    /// Check and record a request for `key` at the current time.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.check_at(key, config, Utc::now()).await
    }

    /// Check and record a request for `key` at `now`.
    pub async fn check_at(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let now_ms = now.timestamp_millis();
        let window_ms = config.window_ms();

        let _guard = self.guard.lock().await;
        let mut timestamps = self.store.get(key).unwrap_or_default();
        timestamps.retain(|t| now_ms - t < window_ms);

        if timestamps.len() >= config.limit as usize {
            let oldest = timestamps.iter().copied().min().unwrap_or(now_ms);
            self.store.set(key, timestamps);
            debug!(key, limit = config.limit, "Rate limit exceeded");
            return RateLimitResult::Limited {
                reset_at_ms: oldest.saturating_add(window_ms),
            };
        }

        timestamps.push(now_ms);
        let used = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        self.store.set(key, timestamps);

        RateLimitResult::Allowed {
            remaining: config.limit.saturating_sub(used),
            reset_at_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// Drop timestamps older than `retention` and delete keys left empty.
    ///
    /// Returns the number of keys removed.
    pub async fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let now_ms = now.timestamp_millis();
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let mut removed = 0;

        for key in self.store.keys() {
            let _guard = self.guard.lock().await;
            let Some(mut timestamps) = self.store.get(&key) else {
                continue;
            };
            timestamps.retain(|t| now_ms - t < retention_ms);
            if timestamps.is_empty() {
                self.store.delete(&key);
                removed += 1;
            } else {
                self.store.set(&key, timestamps);
            }
        }

        removed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.store.keys().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_rejects() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(5, 60);

        for i in 0..5u32 {
            let result = throttle.check_at("test:1", &config, t0() + secs(i as i64)).await;
            assert!(result.is_allowed(), "request {} should be admitted", i + 1);
            assert_eq!(result.remaining(), 4 - i);
        }

        let result = throttle.check_at("test:1", &config, t0() + secs(5)).await;
        assert!(!result.is_allowed());
        assert_eq!(result.remaining(), 0);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_remaining() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(2, 60);

        throttle.check_at("test:4", &config, t0()).await;
        throttle.check_at("test:4", &config, t0()).await;
        assert!(!throttle.check_at("test:4", &config, t0()).await.is_allowed());

        let result = throttle.check_at("test:4", &config, t0() + secs(61)).await;
        assert!(result.is_allowed());
        assert_eq!(result.remaining(), 1);
    }

    #[tokio::test]
    async fn test_timestamp_exactly_one_window_old_is_expired() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(1, 60);

        throttle.check_at("edge", &config, t0()).await;
        assert!(!throttle.check_at("edge", &config, t0() + secs(59)).await.is_allowed());
        assert!(throttle.check_at("edge", &config, t0() + secs(60)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_window_slides_instead_of_resetting() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(2, 60);

        throttle.check_at("slide", &config, t0()).await;
        throttle.check_at("slide", &config, t0() + secs(30)).await;

        // The first admission has aged out, the second has not.
        let result = throttle.check_at("slide", &config, t0() + secs(61)).await;
        assert_eq!(result.remaining(), 0);
        assert!(result.is_allowed());
        assert!(!throttle.check_at("slide", &config, t0() + secs(62)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(1, 60);

        throttle.check_at("test:a", &config, t0()).await;
        assert!(!throttle.check_at("test:a", &config, t0()).await.is_allowed());
        assert!(throttle.check_at("test:b", &config, t0()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_at_anchors_to_oldest_timestamp() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(2, 60);

        let first = throttle.check_at("reset", &config, t0()).await;
        assert_eq!(
            first.reset_at_ms(),
            (t0() + secs(60)).timestamp_millis()
        );
        throttle.check_at("reset", &config, t0() + secs(10)).await;

        let result = throttle.check_at("reset", &config, t0() + secs(20)).await;
        assert_eq!(
            result,
            RateLimitResult::Limited {
                reset_at_ms: (t0() + secs(60)).timestamp_millis()
            }
        );
    }

    #[tokio::test]
    async fn test_rejection_does_not_consume_a_slot() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(1, 60);

        throttle.check_at("no-consume", &config, t0()).await;
        for i in 1..10 {
            throttle.check_at("no-consume", &config, t0() + secs(i)).await;
        }
        assert!(throttle
            .check_at("no-consume", &config, t0() + secs(60))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_keys() {
        let throttle = Throttle::in_memory();
        let config = RateLimitConfig::new(5, 60);
        let retention = Duration::from_secs(600);

        throttle.check_at("stale", &config, t0()).await;
        throttle.check_at("fresh", &config, t0()).await;
        throttle.check_at("fresh", &config, t0() + secs(500)).await;
        assert_eq!(throttle.tracked_keys(), 2);

        let removed = throttle.sweep(t0() + secs(601), retention).await;
        assert_eq!(removed, 1);
        assert_eq!(throttle.tracked_keys(), 1);
        assert_eq!(
            throttle.store.get("fresh"),
            Some(vec![(t0() + secs(500)).timestamp_millis()])
        );
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_over_admit() {
        let throttle = Arc::new(Throttle::in_memory());
        let config = RateLimitConfig::new(10, 60);
        let now = t0();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move { throttle.check_at("shared", &config, now).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_presets() {
        assert_eq!(presets::AUTH, RateLimitConfig::new(5, 60));
        assert_eq!(presets::AI, RateLimitConfig::new(10, 60));
        assert_eq!(presets::API, RateLimitConfig::new(30, 60));
    }
}
