// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Wellness Gate
//!
//! Request admission and plan entitlements for the wellness API:
//!
//! - Sliding window throttle keyed by endpoint class and client address
//!   (auth 5/min, ai 10/min, api 30/min)
//! - Background sweep of idle throttle keys
//! - Plan-based feature gate with daily self-care and weekly journal quotas
//! - Premium-only toggles (streak freezes, insights)
//! - UTC day/week quota windows

pub mod calendar;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod store;

pub use config::Config;
pub use entitlement::{Entitlements, Feature, FeatureAccess, Plan, Quota};
pub use limiter::{RateLimitConfig, RateLimitResult, Throttle};
pub use store::{MemoryUsageStore, UsageStore};
