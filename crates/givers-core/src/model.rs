// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared by the stores and services.
//!
//! Wire format is JSON with snake_case field names and RFC 3339 UTC timestamps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GiversError, Result};

/// A stored string did not match any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

// ============================================================================
// Donations
// ============================================================================

/// Who made a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonorKind {
    /// Anonymous donor identified by a device token.
    Token,
    /// Authenticated user.
    User,
}

impl DonorKind {
    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::User => "user",
        }
    }
}

impl TryFrom<String> for DonorKind {
    type Error = UnknownVariant;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "token" => Ok(Self::Token),
            "user" => Ok(Self::User),
            _ => Err(UnknownVariant {
                kind: "donor type",
                value,
            }),
        }
    }
}

/// A stored donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Donation {
    /// Opaque donation id.
    pub id: String,
    /// Project receiving the donation.
    pub project_id: String,
    /// Anonymous token holder or authenticated user.
    #[sqlx(try_from = "String")]
    pub donor_type: DonorKind,
    /// The token string, or the user id.
    pub donor_id: String,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Three-letter currency code, lower-case.
    pub currency: String,
    /// Supporter message shown in the feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Part of a recurring subscription.
    pub is_recurring: bool,
    /// Payment-processor charge id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_payment_id: Option<String>,
    /// Payment-processor subscription id; absent for one-off donations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,
    /// Recurring billing paused by the donor.
    pub paused: bool,
    /// Message to publish with the next successful recurring charge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_billing_message: Option<String>,
    /// When the donation was recorded.
    pub created_at: DateTime<Utc>,
    /// When the donation was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    /// Whether `user_id` is the authenticated owner of this donation.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.donor_type == DonorKind::User && self.donor_id == user_id
    }
}

/// Input for creating a donation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewDonation {
    pub project_id: String,
    pub donor_type: DonorKind,
    pub donor_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub external_payment_id: Option<String>,
    #[serde(default)]
    pub external_subscription_id: Option<String>,
}

impl NewDonation {
    /// Validate and normalise: empty optional strings become absent and the
    /// currency code is lower-cased.
    pub fn validated(mut self) -> Result<Self> {
        if self.project_id.is_empty() {
            return Err(GiversError::invalid("project_id", "must not be empty"));
        }
        if self.donor_id.is_empty() {
            return Err(GiversError::invalid("donor_id", "must not be empty"));
        }
        if self.amount <= 0 {
            return Err(GiversError::invalid("amount", "must be positive"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GiversError::invalid(
                "currency",
                format!("'{}' is not a 3-letter code", self.currency),
            ));
        }
        self.currency = self.currency.to_ascii_lowercase();
        self.message = non_empty(self.message);
        self.external_payment_id = non_empty(self.external_payment_id);
        self.external_subscription_id = non_empty(self.external_subscription_id);

        if self.donor_type == DonorKind::Token && self.external_subscription_id.is_some() {
            return Err(GiversError::invalid(
                "external_subscription_id",
                "anonymous token donations cannot carry a subscription",
            ));
        }
        Ok(self)
    }
}

/// Sparse update of a donation. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DonationPatch {
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub paused: Option<bool>,
    /// An empty string clears the message.
    #[serde(default)]
    pub next_billing_message: Option<String>,
}

impl DonationPatch {
    /// No field is set.
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.paused.is_none() && self.next_billing_message.is_none()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.amount {
            Some(amount) if amount <= 0 => Err(GiversError::invalid("amount", "must be positive")),
            _ => Ok(()),
        }
    }
}

/// Outcome of promoting an anonymous donor token to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrateTokenResult {
    pub migrated_count: u64,
    /// No rows carried the token: it was migrated earlier or never donated.
    pub already_migrated: bool,
}

impl MigrateTokenResult {
    pub(crate) fn from_count(migrated_count: u64) -> Self {
        Self {
            migrated_count,
            already_migrated: migrated_count == 0,
        }
    }
}

/// Donation total for one platform calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlySum {
    /// `YYYY-MM`.
    pub month: String,
    pub amount: i64,
}

// ============================================================================
// Activity feed
// ============================================================================

/// Kind of feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Donation,
    ProjectCreated,
    ProjectUpdated,
    Milestone,
}

impl ActivityKind {
    /// Database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Donation => "donation",
            Self::ProjectCreated => "project_created",
            Self::ProjectUpdated => "project_updated",
            Self::Milestone => "milestone",
        }
    }
}

impl TryFrom<String> for ActivityKind {
    type Error = UnknownVariant;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "donation" => Ok(Self::Donation),
            "project_created" => Ok(Self::ProjectCreated),
            "project_updated" => Ok(Self::ProjectUpdated),
            "milestone" => Ok(Self::Milestone),
            _ => Err(UnknownVariant {
                kind: "activity kind",
                value,
            }),
        }
    }
}

/// Input for appending a feed event. Id and timestamp are assigned by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub kind: ActivityKind,
    pub project_id: String,
    pub actor_id: Option<String>,
    pub amount: Option<i64>,
    pub rate: Option<i32>,
    pub message: Option<String>,
}

impl NewActivity {
    /// System-emitted milestone event for `project_id` at `rate` percent.
    pub fn milestone(project_id: impl Into<String>, rate: i32) -> Self {
        Self {
            kind: ActivityKind::Milestone,
            project_id: project_id.into(),
            actor_id: None,
            amount: None,
            rate: Some(rate),
            message: None,
        }
    }

    /// Settled donation event. `actor_id` is `None` for anonymous donors.
    pub fn donation(
        project_id: impl Into<String>,
        actor_id: Option<String>,
        amount: i64,
        message: Option<String>,
    ) -> Self {
        Self {
            kind: ActivityKind::Donation,
            project_id: project_id.into(),
            actor_id,
            amount: Some(amount),
            rate: None,
            message,
        }
    }

    /// Validate kind-specific invariants and drop empty strings.
    pub fn validated(mut self) -> Result<Self> {
        if self.project_id.is_empty() {
            return Err(GiversError::invalid("project_id", "must not be empty"));
        }
        self.actor_id = non_empty(self.actor_id);
        self.message = non_empty(self.message);
        match self.kind {
            ActivityKind::Milestone if self.rate.is_none() => {
                Err(GiversError::invalid("rate", "milestone events require a rate"))
            }
            ActivityKind::Milestone if self.actor_id.is_some() => Err(GiversError::invalid(
                "actor_id",
                "milestone events are system-emitted",
            )),
            ActivityKind::Donation if self.amount.is_none() => Err(GiversError::invalid(
                "amount",
                "donation events require an amount",
            )),
            _ => Ok(self),
        }
    }
}

/// Feed entry with display names resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ActivityItem {
    pub id: String,
    #[sqlx(try_from = "String")]
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub project_id: String,
    pub project_name: String,
    /// `None` for anonymous or system events.
    pub actor_name: Option<String>,
    pub amount: Option<i64>,
    pub rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Platform health
// ============================================================================

/// `⌊sum * 100 / target⌋`, or 0 when there is no target or the sum is negative.
pub fn achievement_rate(sum: i64, target: i64) -> i64 {
    if target <= 0 || sum <= 0 {
        return 0;
    }
    sum.saturating_mul(100) / target
}

/// Tri-state platform health indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSignal {
    Red,
    Yellow,
    Green,
}

impl HealthSignal {
    /// Map a rate onto the signal. `warning` is the floor of "green" and
    /// `critical` the floor of "yellow".
    pub fn from_rate(rate: i64, warning_threshold: i32, critical_threshold: i32) -> Self {
        if rate >= i64::from(warning_threshold) {
            Self::Green
        } else if rate >= i64::from(critical_threshold) {
            Self::Yellow
        } else {
            Self::Red
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl fmt::Display for HealthSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singleton record of platform running costs versus receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PlatformHealth {
    pub monthly_cost: i64,
    pub current_monthly: i64,
    pub warning_threshold: i32,
    pub critical_threshold: i32,
    pub updated_at: DateTime<Utc>,
}

impl PlatformHealth {
    /// Percentage of monthly cost covered; may exceed 100.
    pub fn rate(&self) -> i64 {
        achievement_rate(self.current_monthly, self.monthly_cost)
    }

    pub fn signal(&self) -> HealthSignal {
        HealthSignal::from_rate(self.rate(), self.warning_threshold, self.critical_threshold)
    }
}

/// Platform health with derived values, as served to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformHealthReport {
    #[serde(flatten)]
    pub health: PlatformHealth,
    pub rate: i64,
    pub signal: HealthSignal,
}

impl From<PlatformHealth> for PlatformHealthReport {
    fn from(health: PlatformHealth) -> Self {
        let rate = health.rate();
        let signal = health.signal();
        Self {
            health,
            rate,
            signal,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
