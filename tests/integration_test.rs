// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the throttle and entitlement evaluator.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use wellness_gate::{
    calendar,
    entitlement::{JOURNAL_LIMIT_REACHED, SELFCARE_LIMIT_REACHED},
    limiter::{presets, RateLimitResult, Throttle},
    store::{StoreError, Subscription},
    Entitlements, Feature, MemoryUsageStore, Plan, Quota, RateLimitConfig, UsageStore,
};

const USER: &str = "user-1";

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    // March 2026: the 2nd is a Monday
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

async fn create_journal(store: &MemoryUsageStore, now: DateTime<Utc>) {
    assert_ok!(store.create_journal(USER, calendar::today(now), now).await);
}

#[tokio::test]
async fn test_free_journal_week_scenario() {
    let store = Arc::new(MemoryUsageStore::new());
    let entitlements = Entitlements::new(store.clone());

    // Monday to Wednesday, one entry a day, each passing the gate first.
    for day in 2..=4 {
        let now = at(day, 9);
        let access = assert_ok!(entitlements.check_at(USER, Feature::Journal, now).await);
        assert!(access.allowed, "day {day} should be allowed");
        create_journal(&store, now).await;
    }

    // Thursday: the fourth attempt is denied.
    let thursday = assert_ok!(entitlements.check_at(USER, Feature::Journal, at(5, 9)).await);
    assert!(!thursday.allowed);
    assert_eq!(thursday.remaining, Some(Quota::Limited(0)));
    assert_eq!(thursday.message, Some("this week's journal limit reached"));
    assert_eq!(thursday.message, Some(JOURNAL_LIMIT_REACHED));

    // Still denied late on Sunday.
    let sunday = assert_ok!(
        entitlements
            .check_at(USER, Feature::Journal, Utc.with_ymd_and_hms(2026, 3, 8, 23, 59, 59).unwrap())
            .await
    );
    assert!(!sunday.allowed);

    // Next Monday the week rolls over.
    let monday = at(9, 0);
    let access = assert_ok!(entitlements.check_at(USER, Feature::Journal, monday).await);
    assert!(access.allowed);
    create_journal(&store, monday).await;

    let access = assert_ok!(entitlements.check_at(USER, Feature::Journal, monday).await);
    assert!(access.allowed);
    assert_eq!(access.remaining, Some(Quota::Limited(2)));
}

#[tokio::test]
async fn test_upgrade_lifts_quota_and_downgrade_restores_it() {
    let store = Arc::new(MemoryUsageStore::new());
    let entitlements = Entitlements::new(store.clone());
    let now = at(4, 12);

    assert_ok!(
        store
            .record_selfcare_completion(wellness_gate::store::SelfcareCompletion {
                user_id: USER.to_string(),
                routine_type: "stretch".to_string(),
                routine_title: "Neck stretch".to_string(),
                duration_sec: 60,
                date: calendar::today(now),
            })
            .await
    );
    let denied = assert_ok!(entitlements.check_at(USER, Feature::Selfcare, now).await);
    assert_eq!(denied.message, Some(SELFCARE_LIMIT_REACHED));

    assert_ok!(store.upsert_subscription(USER, Plan::Premium, now).await);
    let premium = assert_ok!(entitlements.check_at(USER, Feature::Selfcare, now).await);
    assert!(premium.allowed);
    assert_eq!(premium.limit, Some(Quota::Unlimited));

    assert_ok!(store.upsert_subscription(USER, Plan::Free, now).await);
    let free_again = assert_ok!(entitlements.check_at(USER, Feature::Selfcare, now).await);
    assert!(!free_again.allowed);
}

struct FailingStore;

#[async_trait::async_trait]
impl UsageStore for FailingStore {
    async fn find_subscription(&self, _: &str) -> Result<Option<Subscription>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn upsert_subscription(
        &self,
        _: &str,
        _: Plan,
        _: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn count_selfcare_completions(
        &self,
        _: &str,
        _: chrono::NaiveDate,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn count_journals_since(
        &self,
        _: &str,
        _: chrono::NaiveDate,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn record_selfcare_completion(
        &self,
        _: wellness_gate::store::SelfcareCompletion,
    ) -> Result<wellness_gate::store::SelfcareCompletion, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn create_journal(
        &self,
        _: &str,
        _: chrono::NaiveDate,
        _: DateTime<Utc>,
    ) -> Result<wellness_gate::store::JournalEntry, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let entitlements = Entitlements::new(Arc::new(FailingStore));
    let err = assert_err!(entitlements.check_at(USER, Feature::Insights, at(4, 12)).await);
    assert!(matches!(err, StoreError::Unavailable(_)));
}

#[tokio::test]
async fn test_throttle_window_properties() {
    let throttle = Throttle::in_memory();
    let config = RateLimitConfig::new(3, 60);
    let start = at(2, 9);

    let mut remaining = Vec::new();
    for i in 0..3 {
        let result = throttle
            .check_at("api:198.51.100.2", &config, start + Duration::seconds(i * 10))
            .await;
        remaining.push(result.remaining());
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let rejected = throttle
        .check_at("api:198.51.100.2", &config, start + Duration::seconds(30))
        .await;
    assert_eq!(
        rejected,
        RateLimitResult::Limited {
            reset_at_ms: (start + Duration::seconds(60)).timestamp_millis()
        }
    );

    // A different client is unaffected.
    assert!(throttle
        .check_at("api:203.0.113.9", &config, start + Duration::seconds(30))
        .await
        .is_allowed());

    // Past the window from the first admission, one slot frees up.
    let result = throttle
        .check_at("api:198.51.100.2", &config, start + Duration::seconds(61))
        .await;
    assert!(result.is_allowed());
    assert_eq!(result.remaining(), 0);

    // After a full quiet window the budget is whole again.
    let result = throttle
        .check_at("api:198.51.100.2", &config, start + Duration::seconds(200))
        .await;
    assert_eq!(result.remaining(), 2);
}

#[tokio::test]
async fn test_presets_by_endpoint_class() {
    let throttle = Throttle::in_memory();
    let now = at(2, 9);

    for (prefix, preset) in [("auth", presets::AUTH), ("ai", presets::AI), ("api", presets::API)] {
        let key = format!("{prefix}:unknown");
        for _ in 0..preset.limit {
            assert!(throttle.check_at(&key, &preset, now).await.is_allowed());
        }
        assert!(!throttle.check_at(&key, &preset, now).await.is_allowed());
    }
}
