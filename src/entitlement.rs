// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Plan-based feature entitlements.
//!
//! Usage is re-derived from durable records on every check; nothing is
//! cached here. Counted features compare today's (or this week's) usage
//! against the plan's allowance, the remaining features are either
//! informational or premium-only toggles.
//!
//! A check does not reserve quota. Two concurrent requests can both pass
//! and both write, so limits are soft by one per concurrent writer.

use crate::calendar;
use crate::store::{StoreError, UsageStore};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const SELFCARE_LIMIT_REACHED: &str = "today's self-care limit reached";
pub const JOURNAL_LIMIT_REACHED: &str = "this week's journal limit reached";
pub const STREAK_FREEZE_REQUIRES_PREMIUM: &str = "streak freezes require the premium plan";
pub const INSIGHTS_REQUIRE_PREMIUM: &str = "detailed insights require the premium plan";

/// Subscription tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }

    pub fn limits(&self) -> &'static FeatureLimits {
        match self {
            Self::Free => &FREE_LIMITS,
            Self::Premium => &PREMIUM_LIMITS,
        }
    }

    pub fn is_premium(&self) -> bool {
        matches!(self, Self::Premium)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown plan: {0}")]
pub struct ParsePlanError(pub String);

impl FromStr for Plan {
    type Err = ParsePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(ParsePlanError(other.to_string())),
        }
    }
}

/// A finite allowance or the unbounded sentinel.
///
/// Serializes as a JSON number, or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Limited(u32),
    Unlimited,
}

impl Serialize for Quota {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limited(n) => serializer.serialize_u32(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// Allowances for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLimits {
    pub selfcare_per_day: Quota,
    pub journal_per_week: Quota,
    /// Informational only, never gates a write
    pub mood_history_days: Quota,
    pub streak_freezes: u32,
}

pub const FREE_LIMITS: FeatureLimits = FeatureLimits {
    selfcare_per_day: Quota::Limited(1),
    journal_per_week: Quota::Limited(3),
    mood_history_days: Quota::Limited(7),
    streak_freezes: 0,
};

pub const PREMIUM_LIMITS: FeatureLimits = FeatureLimits {
    selfcare_per_day: Quota::Unlimited,
    journal_per_week: Quota::Unlimited,
    mood_history_days: Quota::Unlimited,
    streak_freezes: 3,
};

/// Gated capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Selfcare,
    Journal,
    MoodHistory,
    StreakFreeze,
    Insights,
}

/// How a feature's usage is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageWindow {
    /// Current UTC calendar day
    Day,
    /// Current week starting Monday 00:00 UTC
    Week,
}

impl UsageWindow {
    /// First UTC date of the window containing `now`.
    pub fn start(&self, now: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Day => calendar::today(now),
            Self::Week => calendar::week_start(now),
        }
    }
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Self::Selfcare,
        Self::Journal,
        Self::MoodHistory,
        Self::StreakFreeze,
        Self::Insights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selfcare => "selfcare",
            Self::Journal => "journal",
            Self::MoodHistory => "moodHistory",
            Self::StreakFreeze => "streakFreeze",
            Self::Insights => "insights",
        }
    }

    /// Counting window, for features that consume quota.
    pub fn window(&self) -> Option<UsageWindow> {
        match self {
            Self::Selfcare => Some(UsageWindow::Day),
            Self::Journal => Some(UsageWindow::Week),
            Self::MoodHistory | Self::StreakFreeze | Self::Insights => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown feature: {0}")]
pub struct ParseFeatureError(pub String);

impl FromStr for Feature {
    type Err = ParseFeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| ParseFeatureError(s.to_string()))
    }
}

/// Outcome of an entitlement check. Denial is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureAccess {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<Quota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Quota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl FeatureAccess {
    fn counted(limit: u32, used: u64, denial: &'static str) -> Self {
        let limit_wide = u64::from(limit);
        let allowed = used < limit_wide;
        let remaining = u32::try_from(limit_wide.saturating_sub(used)).unwrap_or(limit);
        Self {
            allowed,
            remaining: Some(Quota::Limited(remaining)),
            limit: Some(Quota::Limited(limit)),
            message: (!allowed).then_some(denial),
        }
    }

    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: Some(Quota::Unlimited),
            limit: Some(Quota::Unlimited),
            message: None,
        }
    }

    fn toggle(allowed: bool, limit: Option<Quota>, denial: &'static str) -> Self {
        Self {
            allowed,
            remaining: None,
            limit,
            message: (!allowed).then_some(denial),
        }
    }
}

/// Remaining quota for the counted features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub selfcare_remaining: Quota,
    pub journal_remaining: Quota,
}

/// Feature entitlement evaluator.
#[derive(Clone)]
pub struct Entitlements {
    store: Arc<dyn UsageStore>,
}

impl Entitlements {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Resolve the user's plan. No subscription record means free.
    pub async fn plan_for(&self, user_id: &str) -> Result<Plan, StoreError> {
        Ok(self
            .store
            .find_subscription(user_id)
            .await?
            .map(|sub| sub.plan)
            .unwrap_or_default())
    }

    /// Check `feature` for `user_id` at the current time.
    pub async fn check(&self, user_id: &str, feature: Feature) -> Result<FeatureAccess, StoreError> {
        self.check_at(user_id, feature, Utc::now()).await
    }

    /// Check `feature` for `user_id` with quota windows anchored at `now`.
    pub async fn check_at(
        &self,
        user_id: &str,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> Result<FeatureAccess, StoreError> {
        let plan = self.plan_for(user_id).await?;
        let limits = plan.limits();

        let access = match feature {
            Feature::Selfcare => {
                self.counted_access(
                    user_id,
                    feature,
                    limits.selfcare_per_day,
                    SELFCARE_LIMIT_REACHED,
                    now,
                )
                .await?
            }
            Feature::Journal => {
                self.counted_access(
                    user_id,
                    feature,
                    limits.journal_per_week,
                    JOURNAL_LIMIT_REACHED,
                    now,
                )
                .await?
            }
            Feature::MoodHistory => FeatureAccess {
                allowed: true,
                remaining: None,
                limit: Some(limits.mood_history_days),
                message: None,
            },
            Feature::StreakFreeze => FeatureAccess::toggle(
                plan.is_premium(),
                Some(Quota::Limited(limits.streak_freezes)),
                STREAK_FREEZE_REQUIRES_PREMIUM,
            ),
            Feature::Insights => {
                FeatureAccess::toggle(plan.is_premium(), None, INSIGHTS_REQUIRE_PREMIUM)
            }
        };

        if access.allowed {
            debug!(user_id, %feature, %plan, "Feature access granted");
        } else {
            info!(user_id, %feature, %plan, "Feature access denied");
        }

        Ok(access)
    }

    /// Compare usage inside the feature's window against its allowance.
    /// Unbounded allowances skip the count query.
    async fn counted_access(
        &self,
        user_id: &str,
        feature: Feature,
        allowance: Quota,
        denial: &'static str,
        now: DateTime<Utc>,
    ) -> Result<FeatureAccess, StoreError> {
        let (Quota::Limited(limit), Some(window)) = (allowance, feature.window()) else {
            return Ok(FeatureAccess::unlimited());
        };

        let since = window.start(now);
        let used = match window {
            UsageWindow::Day => self.store.count_selfcare_completions(user_id, since).await?,
            UsageWindow::Week => self.store.count_journals_since(user_id, since).await?,
        };
        Ok(FeatureAccess::counted(limit, used, denial))
    }

    /// Remaining self-care and journal quota for the current windows.
    pub async fn usage(&self, user_id: &str) -> Result<UsageSummary, StoreError> {
        self.usage_at(user_id, Utc::now()).await
    }

    pub async fn usage_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageSummary, StoreError> {
        let (selfcare, journal) = tokio::join!(
            self.check_at(user_id, Feature::Selfcare, now),
            self.check_at(user_id, Feature::Journal, now),
        );

        Ok(UsageSummary {
            selfcare_remaining: selfcare?.remaining.unwrap_or(Quota::Limited(0)),
            journal_remaining: journal?.remaining.unwrap_or(Quota::Limited(0)),
        })
    }
}
