// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.
//!
//! Used for embedded deployments and tests. Semantics match
//! [`PostgresStore`](super::PostgresStore); SQLite serialises writers, so the
//! token migration is a single UPDATE without an explicit isolation level.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

use crate::cancel::guard;
use crate::clock::Clock;
use crate::error::{GiversError, Result, is_unique_violation};
use crate::migrations;
use crate::model::{
    ActivityItem, Donation, DonationPatch, MonthlySum, NewActivity, NewDonation, PlatformHealth,
};

use super::{
    ActivityLog, Aggregates, DEFAULT_ANONYMOUS_NAME, DonationStore, PlatformHealthStore,
    bucket_monthly_sums, donation_row, monthly_sums_since, new_id, validate_migration,
    validate_page,
};

const DONATION_COLUMNS: &str = r#"
    id, project_id, donor_type, donor_id, amount, currency, message, is_recurring,
    external_payment_id, external_subscription_id, paused, next_billing_message,
    created_at, updated_at
"#;

const ACTIVITY_SELECT: &str = r#"
    SELECT a.id, a.kind, a.project_id, p.name AS project_name,
           CASE WHEN a.actor_id IS NULL THEN NULL
                ELSE COALESCE(NULLIF(u.name, ''), ?1)
           END AS actor_name,
           a.amount, a.rate, a.message, a.created_at
    FROM activities a
    JOIN projects p ON p.id = a.project_id
    LEFT JOIN users u ON u.id = a.actor_id
"#;

/// SQLite-backed store implementing every persistence capability.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    anonymous_name: String,
}

impl SqliteStore {
    /// Create a new SQLite store from an existing, migrated pool.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            anonymous_name: DEFAULT_ANONYMOUS_NAME.to_string(),
        }
    }

    /// Create and initialize a SQLite store from a file path.
    ///
    /// Creates parent directories and the database file if needed, connects,
    /// and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| GiversError::StoreFault {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| GiversError::StoreFault {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self::new(pool, clock))
    }

    /// Override the placeholder shown for actors with an empty name.
    pub fn with_anonymous_name(mut self, name: impl Into<String>) -> Self {
        self.anonymous_name = name.into();
        self
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DonationStore for SqliteStore {
    async fn create(&self, cancel: &CancellationToken, donation: NewDonation) -> Result<Donation> {
        let row = donation_row(donation.validated()?, self.clock.now());

        guard(cancel, "donations.create", async {
            let result = sqlx::query(
                r#"
                INSERT INTO donations
                    (id, project_id, donor_type, donor_id, amount, currency, message,
                     is_recurring, external_payment_id, external_subscription_id, paused,
                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)
                "#,
            )
            .bind(&row.id)
            .bind(&row.project_id)
            .bind(row.donor_type.as_str())
            .bind(&row.donor_id)
            .bind(row.amount)
            .bind(&row.currency)
            .bind(&row.message)
            .bind(row.is_recurring)
            .bind(&row.external_payment_id)
            .bind(&row.external_subscription_id)
            .bind(row.created_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(GiversError::DuplicateExternalPaymentId {
                    external_payment_id: row.external_payment_id.clone().unwrap_or_default(),
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        Ok(row)
    }

    async fn list_by_user(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>> {
        validate_page(limit, offset)?;
        guard(cancel, "donations.list_by_user", async {
            let records = sqlx::query_as::<_, Donation>(&format!(
                r#"
                SELECT {DONATION_COLUMNS}
                FROM donations
                WHERE donor_type = 'user' AND donor_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#
            ))
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
            Ok(records)
        })
        .await
    }

    async fn list_by_project(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>> {
        validate_page(limit, offset)?;
        guard(cancel, "donations.list_by_project", async {
            let records = sqlx::query_as::<_, Donation>(&format!(
                r#"
                SELECT {DONATION_COLUMNS}
                FROM donations
                WHERE project_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#
            ))
            .bind(project_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
            Ok(records)
        })
        .await
    }

    async fn get_by_id(&self, cancel: &CancellationToken, id: &str) -> Result<Donation> {
        guard(cancel, "donations.get_by_id", async {
            sqlx::query_as::<_, Donation>(&format!(
                "SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GiversError::not_found("donation", id))
        })
        .await
    }

    async fn get_by_external_subscription_id(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> Result<Donation> {
        guard(cancel, "donations.get_by_subscription", async {
            sqlx::query_as::<_, Donation>(&format!(
                r#"
                SELECT {DONATION_COLUMNS}
                FROM donations
                WHERE external_subscription_id = ?
                ORDER BY created_at DESC
                LIMIT 1
                "#
            ))
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GiversError::not_found("subscription", subscription_id))
        })
        .await
    }

    async fn patch(
        &self,
        cancel: &CancellationToken,
        id: &str,
        patch: &DonationPatch,
    ) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        patch.validate()?;

        guard(cancel, "donations.patch", async {
            let result = sqlx::query(
                r#"
                UPDATE donations
                SET amount = COALESCE(?2, amount),
                    paused = COALESCE(?3, paused),
                    next_billing_message = CASE
                        WHEN ?4 IS NULL THEN next_billing_message
                        ELSE NULLIF(?4, '')
                    END,
                    updated_at = ?5
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(patch.amount)
            .bind(patch.paused)
            .bind(&patch.next_billing_message)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(GiversError::not_found("donation", id));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        guard(cancel, "donations.delete", async {
            let result = sqlx::query("DELETE FROM donations WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(GiversError::not_found("donation", id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_by_external_subscription_id(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> Result<u64> {
        guard(cancel, "donations.delete_by_subscription", async {
            let result = sqlx::query("DELETE FROM donations WHERE external_subscription_id = ?")
                .bind(subscription_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn migrate_token(
        &self,
        cancel: &CancellationToken,
        token: &str,
        user_id: &str,
    ) -> Result<u64> {
        validate_migration(token, user_id)?;

        guard(cancel, "donations.migrate_token", async {
            let result = sqlx::query(
                r#"
                UPDATE donations
                SET donor_type = 'user', donor_id = ?1, updated_at = ?3
                WHERE donor_type = 'token' AND donor_id = ?2
                "#,
            )
            .bind(user_id)
            .bind(token)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

#[async_trait]
impl ActivityLog for SqliteStore {
    async fn insert(&self, cancel: &CancellationToken, activity: NewActivity) -> Result<String> {
        let activity = activity.validated()?;
        let id = new_id();

        guard(cancel, "activities.insert", async {
            sqlx::query(
                r#"
                INSERT INTO activities
                    (id, kind, project_id, actor_id, amount, rate, message, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(activity.kind.as_str())
            .bind(&activity.project_id)
            .bind(&activity.actor_id)
            .bind(activity.amount)
            .bind(activity.rate)
            .bind(&activity.message)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        Ok(id)
    }

    async fn exists_milestone_this_month(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        rate: i32,
    ) -> Result<bool> {
        let month_start = self.clock.month_start();

        guard(cancel, "activities.exists_milestone", async {
            let exists: i64 = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM activities
                    WHERE kind = 'milestone'
                      AND project_id = ?
                      AND rate = ?
                      AND created_at >= ?
                )
                "#,
            )
            .bind(project_id)
            .bind(rate)
            .bind(month_start)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists != 0)
        })
        .await
    }

    async fn list_global(
        &self,
        cancel: &CancellationToken,
        limit: i64,
    ) -> Result<Vec<ActivityItem>> {
        validate_page(limit, 0)?;
        guard(cancel, "activities.list_global", async {
            let items = sqlx::query_as::<_, ActivityItem>(&format!(
                "{ACTIVITY_SELECT} ORDER BY a.created_at DESC, a.id DESC LIMIT ?2"
            ))
            .bind(&self.anonymous_name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(items)
        })
        .await
    }

    async fn list_by_project(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityItem>> {
        validate_page(limit, 0)?;
        guard(cancel, "activities.list_by_project", async {
            let items = sqlx::query_as::<_, ActivityItem>(&format!(
                "{ACTIVITY_SELECT} WHERE a.project_id = ?2 \
                 ORDER BY a.created_at DESC, a.id DESC LIMIT ?3"
            ))
            .bind(&self.anonymous_name)
            .bind(project_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(items)
        })
        .await
    }
}

#[async_trait]
impl Aggregates for SqliteStore {
    async fn monthly_target(&self, cancel: &CancellationToken, project_id: &str) -> Result<i64> {
        guard(cancel, "projects.monthly_target", async {
            let target: Option<i64> =
                sqlx::query_scalar("SELECT COALESCE(monthly_target, 0) FROM projects WHERE id = ?")
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(target.unwrap_or(0))
        })
        .await
    }

    async fn current_month_sum(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<i64> {
        let month_start = self.clock.month_start();

        guard(cancel, "donations.current_month_sum", async {
            let sum: i64 = sqlx::query_scalar(
                r#"
                SELECT COALESCE(SUM(amount), 0)
                FROM donations
                WHERE project_id = ?
                  AND created_at >= ?
                "#,
            )
            .bind(project_id)
            .bind(month_start)
            .fetch_one(&self.pool)
            .await?;
            Ok(sum)
        })
        .await
    }

    async fn monthly_sums(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<Vec<MonthlySum>> {
        let since = monthly_sums_since(self.clock.as_ref());

        let rows = guard(cancel, "donations.monthly_sums", async {
            let rows: Vec<(DateTime<Utc>, i64)> = sqlx::query_as(
                r#"
                SELECT created_at, amount
                FROM donations
                WHERE project_id = ?
                  AND created_at >= ?
                "#,
            )
            .bind(project_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await?;

        Ok(bucket_monthly_sums(self.clock.as_ref(), rows))
    }
}

#[async_trait]
impl PlatformHealthStore for SqliteStore {
    async fn get(&self, cancel: &CancellationToken) -> Result<PlatformHealth> {
        guard(cancel, "platform_health.get", async {
            sqlx::query_as::<_, PlatformHealth>(
                r#"
                SELECT monthly_cost, current_monthly, warning_threshold, critical_threshold,
                       updated_at
                FROM platform_health
                WHERE id = 1
                "#,
            )
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GiversError::not_found("platform_health", "1"))
        })
        .await
    }
}
