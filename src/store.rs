// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Durable usage records consumed by the entitlement evaluator.
//!
//! The evaluator only needs a point lookup of the subscription and
//! count-by-predicate over completions and journals. The write methods are
//! used by the gated handlers after a successful check.

use crate::entitlement::Plan;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Length of a premium period started by a plan change.
pub const PREMIUM_PERIOD_DAYS: i64 = 30;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store query failed: {0}")]
    Query(String),
}

/// Subscription record for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub user_id: String,
    pub plan: Plan,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

/// A completed self-care routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfcareCompletion {
    pub user_id: String,
    pub routine_type: String,
    pub routine_title: String,
    pub duration_sec: u32,
    /// UTC calendar date of completion
    pub date: NaiveDate,
}

/// A journal entry header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: Uuid,
    pub user_id: String,
    /// UTC calendar date of creation
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Persistence contract for subscriptions and usage.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn find_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError>;

    /// Create or replace the user's plan. Premium plans run for
    /// [`PREMIUM_PERIOD_DAYS`] from `now`; free plans have no end date.
    async fn upsert_subscription(
        &self,
        user_id: &str,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError>;

    async fn count_selfcare_completions(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<u64, StoreError>;

    /// Count journals dated on or after `since`.
    async fn count_journals_since(&self, user_id: &str, since: NaiveDate)
        -> Result<u64, StoreError>;

    async fn record_selfcare_completion(
        &self,
        completion: SelfcareCompletion,
    ) -> Result<SelfcareCompletion, StoreError>;

    async fn create_journal(
        &self,
        user_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<JournalEntry, StoreError>;
}

/// In-memory store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    completions: RwLock<Vec<SelfcareCompletion>>,
    journals: RwLock<Vec<JournalEntry>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn find_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self.subscriptions.read().await.get(user_id).cloned())
    }

    async fn upsert_subscription(
        &self,
        user_id: &str,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        let end_date = match plan {
            Plan::Premium => Some(now + Duration::days(PREMIUM_PERIOD_DAYS)),
            Plan::Free => None,
        };

        let record = match subscriptions.get(user_id) {
            // Downgrades keep the original start date.
            Some(existing) if plan == Plan::Free => Subscription {
                plan,
                end_date,
                ..existing.clone()
            },
            _ => Subscription {
                user_id: user_id.to_string(),
                plan,
                start_date: now,
                end_date,
            },
        };

        subscriptions.insert(user_id.to_string(), record.clone());
        Ok(record)
    }

    async fn count_selfcare_completions(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<u64, StoreError> {
        let completions = self.completions.read().await;
        Ok(completions
            .iter()
            .filter(|c| c.user_id == user_id && c.date == date)
            .count() as u64)
    }

    async fn count_journals_since(
        &self,
        user_id: &str,
        since: NaiveDate,
    ) -> Result<u64, StoreError> {
        let journals = self.journals.read().await;
        Ok(journals
            .iter()
            .filter(|j| j.user_id == user_id && j.date >= since)
            .count() as u64)
    }

    async fn record_selfcare_completion(
        &self,
        completion: SelfcareCompletion,
    ) -> Result<SelfcareCompletion, StoreError> {
        self.completions.write().await.push(completion.clone());
        Ok(completion)
    }

    async fn create_journal(
        &self,
        user_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<JournalEntry, StoreError> {
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            date,
            created_at: now,
        };
        self.journals.write().await.push(entry.clone());
        Ok(entry)
    }
}
