// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for givers-core.
//!
//! Each component is a capability trait so services can be wired against any
//! backend (or a test double). [`PostgresStore`] and [`SqliteStore`] each
//! implement all of them over a single connection pool.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{self, Clock};
use crate::error::{GiversError, Result};
use crate::model::{
    ActivityItem, Donation, DonationPatch, MonthlySum, NewActivity, NewDonation, PlatformHealth,
};

/// Display name used for actors whose stored name is empty.
pub const DEFAULT_ANONYMOUS_NAME: &str = "anonymous";

/// Number of months covered by [`Aggregates::monthly_sums`].
pub const MONTHLY_SUMS_WINDOW: u32 = 12;

/// Donation persistence.
#[async_trait]
pub trait DonationStore: Send + Sync {
    /// Insert a donation.
    ///
    /// Fails with `DuplicateExternalPaymentId` if another row already carries
    /// the same non-empty external payment id.
    async fn create(&self, cancel: &CancellationToken, donation: NewDonation) -> Result<Donation>;

    /// Donations owned by `user_id`, newest first.
    async fn list_by_user(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>>;

    /// Donations to `project_id`, newest first.
    async fn list_by_project(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>>;

    async fn get_by_id(&self, cancel: &CancellationToken, id: &str) -> Result<Donation>;

    async fn get_by_external_subscription_id(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> Result<Donation>;

    /// Apply a sparse update. An empty patch succeeds without touching the store.
    async fn patch(&self, cancel: &CancellationToken, id: &str, patch: &DonationPatch)
    -> Result<()>;

    async fn delete(&self, cancel: &CancellationToken, id: &str) -> Result<()>;

    /// Remove every donation of a cancelled subscription. Zero matches is success.
    async fn delete_by_external_subscription_id(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> Result<u64>;

    /// Atomically reassign every donation of anonymous `token` to `user_id`.
    ///
    /// Returns the number of rows promoted; 0 means the token was already
    /// migrated or never donated.
    async fn migrate_token(
        &self,
        cancel: &CancellationToken,
        token: &str,
        user_id: &str,
    ) -> Result<u64>;
}

/// Append-only activity feed.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one event and return its id.
    async fn insert(&self, cancel: &CancellationToken, activity: NewActivity) -> Result<String>;

    /// Whether a milestone at `rate` was already recorded for the project
    /// within the current calendar month.
    async fn exists_milestone_this_month(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        rate: i32,
    ) -> Result<bool>;

    async fn list_global(&self, cancel: &CancellationToken, limit: i64)
    -> Result<Vec<ActivityItem>>;

    async fn list_by_project(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityItem>>;
}

/// Read-only per-project counters.
#[async_trait]
pub trait Aggregates: Send + Sync {
    /// Configured monthly target, or 0 if the project has none.
    async fn monthly_target(&self, cancel: &CancellationToken, project_id: &str) -> Result<i64>;

    /// Sum of donation amounts created in the current calendar month.
    async fn current_month_sum(&self, cancel: &CancellationToken, project_id: &str)
    -> Result<i64>;

    /// Monthly totals for the current and preceding months, oldest first, zero-filled.
    async fn monthly_sums(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<Vec<MonthlySum>>;
}

/// Access to the platform-health singleton.
#[async_trait]
pub trait PlatformHealthStore: Send + Sync {
    async fn get(&self, cancel: &CancellationToken) -> Result<PlatformHealth>;
}

// ============================================================================
// Shared helpers
// ============================================================================

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn validate_page(limit: i64, offset: i64) -> Result<()> {
    if limit <= 0 {
        return Err(GiversError::invalid("limit", "must be positive"));
    }
    if offset < 0 {
        return Err(GiversError::invalid("offset", "must not be negative"));
    }
    Ok(())
}

pub(crate) fn validate_migration(token: &str, user_id: &str) -> Result<()> {
    if token.is_empty() {
        return Err(GiversError::invalid("donor_token", "must not be empty"));
    }
    if user_id.is_empty() {
        return Err(GiversError::invalid("user_id", "must not be empty"));
    }
    Ok(())
}

/// Build the stored row for a validated [`NewDonation`].
pub(crate) fn donation_row(new: NewDonation, now: DateTime<Utc>) -> Donation {
    Donation {
        id: new_id(),
        project_id: new.project_id,
        donor_type: new.donor_type,
        donor_id: new.donor_id,
        amount: new.amount,
        currency: new.currency,
        message: new.message,
        is_recurring: new.is_recurring,
        external_payment_id: new.external_payment_id,
        external_subscription_id: new.external_subscription_id,
        paused: false,
        next_billing_message: None,
        created_at: now,
        updated_at: now,
    }
}

/// Start of the window covered by [`Aggregates::monthly_sums`].
pub(crate) fn monthly_sums_since(clock: &dyn Clock) -> DateTime<Utc> {
    clock::months_before(clock.month_start(), clock.offset(), MONTHLY_SUMS_WINDOW - 1)
}

/// Bucket `(created_at, amount)` rows into zero-filled platform months.
pub(crate) fn bucket_monthly_sums(
    clock: &dyn Clock,
    rows: impl IntoIterator<Item = (DateTime<Utc>, i64)>,
) -> Vec<MonthlySum> {
    let offset = clock.offset();
    let current = clock.month_start();
    let mut sums: Vec<MonthlySum> = (0..MONTHLY_SUMS_WINDOW)
        .rev()
        .map(|n| MonthlySum {
            month: clock::month_key(clock::months_before(current, offset, n), offset),
            amount: 0,
        })
        .collect();

    for (created_at, amount) in rows {
        let key = clock::month_key(created_at, offset);
        if let Some(slot) = sums.iter_mut().find(|s| s.month == key) {
            slot.amount += amount;
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(10, 0).is_ok());
        assert!(validate_page(0, 0).is_err());
        assert!(validate_page(10, -1).is_err());
    }

    #[test]
    fn test_bucket_monthly_sums_zero_fills_window() {
        let clock = FixedClock::at_utc(utc("2025-03-15T00:00:00Z"));
        let sums = bucket_monthly_sums(
            &clock,
            vec![
                (utc("2025-03-02T00:00:00Z"), 500),
                (utc("2025-03-10T00:00:00Z"), 250),
                (utc("2024-04-30T23:59:59Z"), 100),
                (utc("2024-03-31T00:00:00Z"), 999),
            ],
        );

        assert_eq!(sums.len(), 12);
        assert_eq!(sums.first().unwrap().month, "2024-04");
        assert_eq!(sums.first().unwrap().amount, 100);
        assert_eq!(sums.last().unwrap().month, "2025-03");
        assert_eq!(sums.last().unwrap().amount, 750);
        assert_eq!(sums.iter().map(|s| s.amount).sum::<i64>(), 850);
    }

    #[test]
    fn test_monthly_sums_since() {
        let clock = FixedClock::at_utc(utc("2025-03-15T00:00:00Z"));
        assert_eq!(monthly_sums_since(&clock), utc("2024-04-01T00:00:00Z"));
    }
}
