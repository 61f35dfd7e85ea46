// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Time source and calendar-month bucketing.
//!
//! Components never read the system clock directly. They ask an injected
//! [`Clock`] for "now" and for the first instant of the current calendar
//! month in platform time. Test doubles go through the same
//! [`month_start`] function so month boundaries agree everywhere.

use std::sync::RwLock;

use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, Months, NaiveTime, Offset, Utc};

/// Supplies the current instant and the platform timezone.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Platform timezone, as a fixed UTC offset.
    fn offset(&self) -> FixedOffset;

    /// First instant of the calendar month containing [`Clock::now`].
    fn month_start(&self) -> DateTime<Utc> {
        month_start(self.now(), self.offset())
    }
}

/// First instant of the calendar month (in `offset` local time) containing `instant`.
pub fn month_start(instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = instant.with_timezone(&offset);
    let first_day = local.date_naive() - Days::new(u64::from(local.day0()));
    (first_day.and_time(NaiveTime::MIN) - offset).and_utc()
}

/// `n` months before the month starting at `start` (which must be a month start).
pub fn months_before(start: DateTime<Utc>, offset: FixedOffset, n: u32) -> DateTime<Utc> {
    let local = start.with_timezone(&offset).naive_local();
    match local.checked_sub_months(Months::new(n)) {
        Some(earlier) => (earlier - offset).and_utc(),
        None => start,
    }
}

/// `"YYYY-MM"` label of the platform month containing `instant`.
pub fn month_key(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant.with_timezone(&offset).format("%Y-%m").to_string()
}

/// Wall clock in a fixed platform timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Create a system clock for the given platform offset.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// System clock with calendar months in UTC.
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    /// Clock frozen at `now` with calendar months in `offset` local time.
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: RwLock::new(now),
            offset,
        }
    }

    /// Clock frozen at `now` with calendar months in UTC.
    pub fn at_utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}
