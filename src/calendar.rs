// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Quota window boundaries.
//!
//! All boundaries are UTC calendar dates. Stored usage dates are captured
//! with the same functions, so capture, storage and comparison never mix
//! timezones.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

/// The UTC calendar date containing `now`.
pub fn today(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Monday (UTC) of the week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> NaiveDate {
    let today = today(now);
    let offset = u64::from(today.weekday().num_days_from_monday());
    // Monday is at most six days back, which is always representable.
    today.checked_sub_days(Days::new(offset)).unwrap_or(today)
}
