// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Givers Core - Donation Lifecycle and Milestones
//!
//! This crate holds the persistence-facing core of the Givers donation
//! platform: recording donations, promoting anonymous donors to accounts,
//! appending to the public activity feed, announcing monthly funding
//! milestones, and reporting platform health.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐   ┌──────────────────┐
//! │ Payment settlement   │   │ Session / auth       │   │ Feed, dashboard  │
//! └──────────┬───────────┘   └──────────┬───────────┘   └────────┬─────────┘
//!            │ on_donation_settled      │ migrate_token          │ list / get
//!            ▼                          ▼                        │
//! ┌─────────────────────────────────────────────────┐            │
//! │                DonationService                  │            │
//! └──────┬───────────────────────┬──────────────────┘            │
//!        │                       │ notify_donation               │
//!        │                       ▼                               │
//!        │            ┌──────────────────────┐                   │
//!        │            │  MilestoneObserver   │                   │
//!        │            └──────────┬───────────┘                   │
//!        ▼                       ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DonationStore │ ActivityLog │ Aggregates │ PlatformHealthStore          │
//! │            PostgresStore  /  SqliteStore (one pool each)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Settlement Pipeline
//!
//! | Step | Component | On failure |
//! |------|-----------|------------|
//! | 1 | `DonationStore::create` | duplicate payment id ends the pipeline quietly; anything else propagates |
//! | 2 | `ActivityLog::insert` (donation event) | logged, pipeline continues |
//! | 3 | `MilestoneObserver::notify_donation` | logged, never propagates |
//!
//! # Milestones
//!
//! Thresholds are 100% and 50% of the project's monthly target, checked high
//! to low against the current calendar month's receipts. Each (project,
//! threshold, month) is announced at most once under single-threaded use and
//! never retracted. Calendar months are evaluated by the injected
//! [`clock::Clock`] in the platform timezone.
//!
//! # Platform Health
//!
//! | Rate | Signal |
//! |------|--------|
//! | `rate >= warning_threshold` | `green` |
//! | `rate >= critical_threshold` | `yellow` |
//! | otherwise | `red` |
//!
//! `rate = current_monthly * 100 / monthly_cost`, truncated, 0 when the cost is 0.
//!
//! # Configuration
//!
//! The library reads no environment variables. The `givers-core` binary
//! loads:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `GIVERS_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `GIVERS_MAX_CONNECTIONS` | No | `10` | Pool size |
//! | `GIVERS_PLATFORM_UTC_OFFSET` | No | `+09:00` | Timezone defining calendar months |
//! | `GIVERS_ANONYMOUS_DISPLAY_NAME` | No | `anonymous` | Feed name for actors without one |
//!
//! # Cancellation
//!
//! Every operation takes a [`tokio_util::sync::CancellationToken`] first.
//! Store round-trips return [`error::GiversError::Cancelled`] once it fires.

/// Cancellation guard for store round-trips.
pub mod cancel;

/// Time source and calendar-month arithmetic.
pub mod clock;

/// Configuration loaded from environment variables.
pub mod config;

/// Donation lifecycle service.
pub mod donations;

/// Error types with stable error codes.
pub mod error;

/// Embedded schema migrations.
pub mod migrations;

/// Milestone observer.
pub mod milestone;

/// Domain types and wire formats.
pub mod model;

/// Storage capability traits and backends.
pub mod persistence;

/// Platform-health reader.
pub mod platform_health;

pub use clock::{Clock, FixedClock, SystemClock};
pub use donations::{DonationService, SettlementOutcome, SubscriptionError, SubscriptionManager};
pub use error::{ErrorKind, GiversError, Result};
pub use milestone::{MILESTONE_THRESHOLDS, MilestoneObserver};
pub use persistence::{
    ActivityLog, Aggregates, DonationStore, PlatformHealthStore, PostgresStore, SqliteStore,
};
pub use platform_health::PlatformHealthReader;
