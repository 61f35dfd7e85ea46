// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for givers-core PostgreSQL integration tests.
//!
//! Tests share one database, so every fixture uses freshly generated ids.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use givers_core::FixedClock;
use givers_core::PostgresStore;
use givers_core::migrations;
use givers_core::model::{DonorKind, NewDonation};

/// Database pool, controllable clock and store for one test.
pub struct TestContext {
    pub pool: PgPool,
    pub clock: Arc<FixedClock>,
    pub store: Arc<PostgresStore>,
}

impl TestContext {
    /// Connect to `TEST_DATABASE_URL` and apply migrations.
    ///
    /// The clock starts at `now` with calendar months in UTC.
    pub async fn new(now: &str) -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.ok()?;
        migrations::run_postgres(&pool).await.ok()?;

        let clock = Arc::new(FixedClock::at_utc(utc(now)));
        let store = Arc::new(PostgresStore::new(pool.clone(), clock.clone()));
        Some(Self { pool, clock, store })
    }

    /// Insert a user and return its id.
    pub async fn seed_user(&self, name: &str) -> String {
        let id = unique("user");
        sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2)")
            .bind(&id)
            .bind(name)
            .execute(&self.pool)
            .await
            .expect("Failed to seed user");
        id
    }

    /// Insert a project with the given monthly target and return its id.
    pub async fn seed_project(&self, monthly_target: Option<i64>) -> String {
        let owner = self.seed_user("Owner").await;
        let id = unique("proj");
        sqlx::query(
            "INSERT INTO projects (id, owner_id, name, monthly_target) VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(&owner)
        .bind(format!("Project {id}"))
        .bind(monthly_target)
        .execute(&self.pool)
        .await
        .expect("Failed to seed project");
        id
    }
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// Collision-free identifier with a readable prefix.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

pub fn token_donation(project_id: &str, token: &str, amount: i64) -> NewDonation {
    NewDonation {
        project_id: project_id.to_string(),
        donor_type: DonorKind::Token,
        donor_id: token.to_string(),
        amount,
        currency: "jpy".to_string(),
        message: None,
        is_recurring: false,
        external_payment_id: None,
        external_subscription_id: None,
    }
}

pub fn user_donation(project_id: &str, user_id: &str, amount: i64) -> NewDonation {
    NewDonation {
        donor_type: DonorKind::User,
        donor_id: user_id.to_string(),
        ..token_donation(project_id, "", amount)
    }
}

/// Skip the test if no database is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
