// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Donation lifecycle service.
//!
//! Sits between the payment-settlement and account collaborators and the
//! stores:
//!
//! | Entry point | Effect |
//! |-------------|--------|
//! | `on_donation_settled` | create donation, record feed event, check milestones |
//! | `on_subscription_cancelled` | remove the subscription's donations |
//! | `on_invoice_paid` | publish and clear the pending next-billing message |
//! | `migrate_token` | promote anonymous token donations to a user |
//! | `patch` / `delete` | owner-checked changes, mirrored to the subscription manager |
//!
//! Payment-processor calls stay behind [`SubscriptionManager`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorKind, GiversError, Result};
use crate::milestone::MilestoneObserver;
use crate::model::{
    Donation, DonationPatch, DonorKind, MigrateTokenResult, NewActivity, NewDonation,
};
use crate::persistence::{ActivityLog, DonationStore};

/// Failure reported by the payment processor.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SubscriptionError(pub String);

/// Recurring-billing controls at the payment processor.
#[async_trait]
pub trait SubscriptionManager: Send + Sync {
    async fn pause(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> std::result::Result<(), SubscriptionError>;

    async fn resume(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> std::result::Result<(), SubscriptionError>;

    async fn cancel(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> std::result::Result<(), SubscriptionError>;
}

/// Result of handling a settlement notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The donation was stored and announced.
    Recorded(Donation),
    /// The payment was already stored by an earlier delivery.
    Duplicate,
}

/// Donation lifecycle operations.
#[derive(Clone)]
pub struct DonationService {
    donations: Arc<dyn DonationStore>,
    activities: Arc<dyn ActivityLog>,
    milestones: MilestoneObserver,
    subscriptions: Option<Arc<dyn SubscriptionManager>>,
}

impl DonationService {
    pub fn new(
        donations: Arc<dyn DonationStore>,
        activities: Arc<dyn ActivityLog>,
        milestones: MilestoneObserver,
    ) -> Self {
        Self {
            donations,
            activities,
            milestones,
            subscriptions: None,
        }
    }

    /// Mirror pause/resume/delete of recurring donations to `manager`.
    pub fn with_subscription_manager(mut self, manager: Arc<dyn SubscriptionManager>) -> Self {
        self.subscriptions = Some(manager);
        self
    }

    // ========================================================================
    // Settlement Operations
    // ========================================================================

    /// Record a donation the payment processor reported as settled.
    ///
    /// A re-delivered notification is reported as [`SettlementOutcome::Duplicate`]
    /// and has no further effect. Feed and milestone updates never fail the call.
    #[instrument(skip(self, cancel, donation), fields(project_id = %donation.project_id))]
    pub async fn on_donation_settled(
        &self,
        cancel: &CancellationToken,
        donation: NewDonation,
    ) -> Result<SettlementOutcome> {
        let donation = match self.donations.create(cancel, donation).await {
            Ok(donation) => donation,
            Err(GiversError::DuplicateExternalPaymentId {
                external_payment_id,
            }) => {
                info!(external_payment_id = %external_payment_id, "Duplicate settlement ignored");
                return Ok(SettlementOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        };

        info!(
            donation_id = %donation.id,
            amount = donation.amount,
            donor_type = donation.donor_type.as_str(),
            "Donation recorded"
        );

        self.record_donation_activity(cancel, &donation, donation.message.clone())
            .await;

        if let Err(e) = self
            .milestones
            .notify_donation(cancel, &donation.project_id)
            .await
        {
            warn!(error = %e, "Milestone check rejected");
        }

        Ok(SettlementOutcome::Recorded(donation))
    }

    /// Remove every donation belonging to a cancelled subscription.
    #[instrument(skip(self, cancel))]
    pub async fn on_subscription_cancelled(
        &self,
        cancel: &CancellationToken,
        subscription_id: &str,
    ) -> Result<u64> {
        if subscription_id.is_empty() {
            return Err(GiversError::invalid("subscription_id", "must not be empty"));
        }
        let removed = self
            .donations
            .delete_by_external_subscription_id(cancel, subscription_id)
            .await?;
        info!(removed, "Subscription donations removed");
        Ok(removed)
    }

    /// Publish the donor's pending next-billing message after a recurring charge.
    ///
    /// One-off invoices, unknown subscriptions and store failures are skipped.
    #[instrument(skip(self, cancel))]
    pub async fn on_invoice_paid(&self, cancel: &CancellationToken, subscription_id: &str) {
        if subscription_id.is_empty() {
            return;
        }

        let donation = match self
            .donations
            .get_by_external_subscription_id(cancel, subscription_id)
            .await
        {
            Ok(donation) => donation,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No donation for subscription");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load subscription donation");
                return;
            }
        };

        let Some(message) = donation.next_billing_message.clone() else {
            return;
        };

        self.record_donation_activity(cancel, &donation, Some(message))
            .await;

        let clear = DonationPatch {
            next_billing_message: Some(String::new()),
            ..Default::default()
        };
        if let Err(e) = self.donations.patch(cancel, &donation.id, &clear).await {
            warn!(donation_id = %donation.id, error = %e, "Failed to clear next billing message");
        }
    }

    async fn record_donation_activity(
        &self,
        cancel: &CancellationToken,
        donation: &Donation,
        message: Option<String>,
    ) {
        let actor_id = match donation.donor_type {
            DonorKind::User => Some(donation.donor_id.clone()),
            DonorKind::Token => None,
        };
        let activity =
            NewActivity::donation(&donation.project_id, actor_id, donation.amount, message);

        if let Err(e) = self.activities.insert(cancel, activity).await {
            warn!(donation_id = %donation.id, error = %e, "Failed to record donation activity");
        }
    }

    // ========================================================================
    // Donor Operations
    // ========================================================================

    /// Promote every donation made under anonymous `token` to `user_id`.
    #[instrument(skip(self, cancel, token))]
    pub async fn migrate_token(
        &self,
        cancel: &CancellationToken,
        token: &str,
        user_id: &str,
    ) -> Result<MigrateTokenResult> {
        let count = self.donations.migrate_token(cancel, token, user_id).await?;
        let result = MigrateTokenResult::from_count(count);
        info!(
            migrated_count = result.migrated_count,
            already_migrated = result.already_migrated,
            "Donor token migrated"
        );
        Ok(result)
    }

    pub async fn list_by_user(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Donation>> {
        self.donations
            .list_by_user(cancel, user_id, limit, offset)
            .await
    }

    /// Apply `patch` to a donation owned by `user_id`.
    ///
    /// Pausing or resuming a recurring donation is applied at the payment
    /// processor first; if that fails the row is left unchanged.
    #[instrument(skip(self, cancel, patch))]
    pub async fn patch(
        &self,
        cancel: &CancellationToken,
        id: &str,
        user_id: &str,
        patch: DonationPatch,
    ) -> Result<()> {
        patch.validate()?;
        let donation = self.owned_donation(cancel, id, user_id).await?;

        if let (Some(paused), Some(subscription_id), Some(manager)) = (
            patch.paused,
            recurring_subscription(&donation),
            &self.subscriptions,
        ) {
            let (operation, result) = if paused {
                (
                    "subscription.pause",
                    manager.pause(cancel, subscription_id).await,
                )
            } else {
                (
                    "subscription.resume",
                    manager.resume(cancel, subscription_id).await,
                )
            };
            result.map_err(|e| subscription_fault(operation, e))?;
            info!(subscription_id, paused, "Subscription updated");
        }

        self.donations.patch(cancel, id, &patch).await
    }

    /// Delete a donation owned by `user_id`, cancelling its subscription first.
    #[instrument(skip(self, cancel))]
    pub async fn delete(&self, cancel: &CancellationToken, id: &str, user_id: &str) -> Result<()> {
        let donation = self.owned_donation(cancel, id, user_id).await?;

        if let (Some(subscription_id), Some(manager)) =
            (recurring_subscription(&donation), &self.subscriptions)
        {
            manager
                .cancel(cancel, subscription_id)
                .await
                .map_err(|e| subscription_fault("subscription.cancel", e))?;
            info!(subscription_id, "Subscription cancelled");
        }

        self.donations.delete(cancel, id).await
    }

    async fn owned_donation(
        &self,
        cancel: &CancellationToken,
        id: &str,
        user_id: &str,
    ) -> Result<Donation> {
        let donation = self.donations.get_by_id(cancel, id).await?;
        if !donation.is_owned_by(user_id) {
            return Err(GiversError::Forbidden {
                reason: format!("donation '{id}' is not owned by the acting user"),
            });
        }
        Ok(donation)
    }
}

fn recurring_subscription(donation: &Donation) -> Option<&str> {
    if !donation.is_recurring {
        return None;
    }
    donation.external_subscription_id.as_deref()
}

fn subscription_fault(operation: &str, err: SubscriptionError) -> GiversError {
    GiversError::StoreFault {
        operation: operation.to_string(),
        details: err.to_string(),
    }
}
