// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Milestone observer.
//!
//! After every settled donation the observer compares the project's
//! month-to-date receipts with its monthly target and appends a `milestone`
//! activity for each catalogue threshold crossed for the first time this
//! calendar month.
//!
//! Emission is best-effort. Every downstream failure is logged and swallowed
//! so a donor's payment never appears to fail because of it. The
//! exists-then-insert sequence is not atomic; concurrent notifications for the
//! same project may rarely emit a duplicate milestone within a month.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{GiversError, Result};
use crate::model::{NewActivity, achievement_rate};
use crate::persistence::{ActivityLog, Aggregates};

/// Milestone catalogue in percent, evaluated high to low.
pub const MILESTONE_THRESHOLDS: [i32; 2] = [100, 50];

/// Emits milestone activity events when a project crosses a threshold.
#[derive(Clone)]
pub struct MilestoneObserver {
    aggregates: Arc<dyn Aggregates>,
    activities: Arc<dyn ActivityLog>,
}

impl MilestoneObserver {
    /// Create an observer over the given collaborators.
    pub fn new(aggregates: Arc<dyn Aggregates>, activities: Arc<dyn ActivityLog>) -> Self {
        Self {
            aggregates,
            activities,
        }
    }

    /// React to a settled donation for `project_id`.
    ///
    /// Only an empty `project_id` is reported as an error. Store failures,
    /// cancellation included, are logged and the call still succeeds.
    #[instrument(skip(self, cancel), fields(project_id = %project_id))]
    pub async fn notify_donation(&self, cancel: &CancellationToken, project_id: &str) -> Result<()> {
        if project_id.is_empty() {
            return Err(GiversError::invalid("project_id", "must not be empty"));
        }

        let target = match self.aggregates.monthly_target(cancel, project_id).await {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Failed to load monthly target, skipping milestone check");
                return Ok(());
            }
        };
        if target <= 0 {
            debug!("Project has no monthly target");
            return Ok(());
        }

        let sum = match self.aggregates.current_month_sum(cancel, project_id).await {
            Ok(sum) => sum,
            Err(e) => {
                warn!(error = %e, "Failed to load current month sum, skipping milestone check");
                return Ok(());
            }
        };

        let rate = achievement_rate(sum, target);
        debug!(target, sum, rate, "Evaluating milestones");

        for threshold in MILESTONE_THRESHOLDS {
            if rate < i64::from(threshold) {
                continue;
            }
            self.emit_once(cancel, project_id, threshold, rate).await;
        }

        Ok(())
    }

    async fn emit_once(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        threshold: i32,
        rate: i64,
    ) {
        match self
            .activities
            .exists_milestone_this_month(cancel, project_id, threshold)
            .await
        {
            Ok(true) => {
                debug!(threshold, "Milestone already emitted this month");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(threshold, error = %e, "Failed to check existing milestone");
                return;
            }
        }

        match self
            .activities
            .insert(cancel, NewActivity::milestone(project_id, threshold))
            .await
        {
            Ok(activity_id) => {
                info!(threshold, rate, activity_id = %activity_id, "Milestone reached");
            }
            Err(e) => {
                warn!(threshold, error = %e, "Failed to record milestone");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ErrorKind;
    use crate::model::{ActivityItem, ActivityKind, MonthlySum};
    use crate::persistence::sqlite::tests::{seed_project, test_store, token_donation, utc};
    use crate::persistence::{DonationStore, SqliteStore};

    fn store_fault(operation: &str) -> GiversError {
        GiversError::StoreFault {
            operation: operation.to_string(),
            details: "connection reset".to_string(),
        }
    }

    async fn milestone_rates(store: &SqliteStore, project_id: &str) -> Vec<i32> {
        ActivityLog::list_by_project(store, &CancellationToken::new(), project_id, 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ActivityKind::Milestone)
            .filter_map(|a| a.rate)
            .collect()
    }

    async fn setup(
        now: &str,
        target: Option<i64>,
    ) -> (Arc<FixedClock>, Arc<SqliteStore>, MilestoneObserver) {
        let clock = Arc::new(FixedClock::at_utc(utc(now)));
        let store = Arc::new(test_store(clock.clone()).await);
        seed_project(store.pool(), "proj-1", target).await;
        let observer = MilestoneObserver::new(store.clone(), store.clone());
        (clock, store, observer)
    }

    async fn donate(store: &SqliteStore, amount: i64) {
        store
            .create(
                &CancellationToken::new(),
                token_donation("proj-1", "tok-1", amount),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_half_target_emits_fifty_once() {
        let (_clock, store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        let cancel = CancellationToken::new();
        donate(&store, 5_000).await;

        observer.notify_donation(&cancel, "proj-1").await.unwrap();
        assert_eq!(milestone_rates(&store, "proj-1").await, vec![50]);

        observer.notify_donation(&cancel, "proj-1").await.unwrap();
        assert_eq!(milestone_rates(&store, "proj-1").await, vec![50]);
    }

    #[tokio::test]
    async fn test_full_target_emits_both_in_one_call() {
        let (_clock, store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        let cancel = CancellationToken::new();
        donate(&store, 10_000).await;

        observer.notify_donation(&cancel, "proj-1").await.unwrap();

        let mut rates = milestone_rates(&store, "proj-1").await;
        rates.sort_unstable();
        assert_eq!(rates, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_crossing_hundred_after_fifty_adds_only_hundred() {
        let (clock, store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        let cancel = CancellationToken::new();

        donate(&store, 6_000).await;
        observer.notify_donation(&cancel, "proj-1").await.unwrap();
        clock.advance(Duration::hours(1));
        donate(&store, 4_000).await;
        observer.notify_donation(&cancel, "proj-1").await.unwrap();

        assert_eq!(milestone_rates(&store, "proj-1").await, vec![100, 50]);
    }

    #[tokio::test]
    async fn test_zero_or_missing_target_skips() {
        let (_clock, store, observer) = setup("2025-03-10T00:00:00Z", None).await;
        let cancel = CancellationToken::new();
        donate(&store, 1_000_000).await;

        observer.notify_donation(&cancel, "proj-1").await.unwrap();
        observer.notify_donation(&cancel, "unknown-project").await.unwrap();

        assert!(milestone_rates(&store, "proj-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_below_fifty_emits_nothing() {
        let (_clock, store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        donate(&store, 4_999).await;

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();

        assert!(milestone_rates(&store, "proj-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_new_month_re_emits() {
        let (clock, store, observer) = setup("2025-03-20T00:00:00Z", Some(10_000)).await;
        let cancel = CancellationToken::new();

        donate(&store, 5_000).await;
        observer.notify_donation(&cancel, "proj-1").await.unwrap();

        clock.set(utc("2025-04-02T00:00:00Z"));
        // Last month's donations no longer count.
        observer.notify_donation(&cancel, "proj-1").await.unwrap();
        assert_eq!(milestone_rates(&store, "proj-1").await, vec![50]);

        donate(&store, 5_000).await;
        observer.notify_donation(&cancel, "proj-1").await.unwrap();
        assert_eq!(milestone_rates(&store, "proj-1").await, vec![50, 50]);
    }

    #[tokio::test]
    async fn test_refund_does_not_retract() {
        let (_clock, store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        let cancel = CancellationToken::new();
        let donation = store
            .create(&cancel, token_donation("proj-1", "tok-1", 5_000))
            .await
            .unwrap();
        observer.notify_donation(&cancel, "proj-1").await.unwrap();

        store.delete(&cancel, &donation.id).await.unwrap();
        observer.notify_donation(&cancel, "proj-1").await.unwrap();

        assert_eq!(milestone_rates(&store, "proj-1").await, vec![50]);
    }

    #[tokio::test]
    async fn test_empty_project_id_is_the_only_error() {
        let (_clock, _store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        let err = observer
            .notify_donation(&CancellationToken::new(), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_cancellation_is_swallowed() {
        let (_clock, store, observer) = setup("2025-03-10T00:00:00Z", Some(10_000)).await;
        donate(&store, 10_000).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        observer.notify_donation(&cancel, "proj-1").await.unwrap();

        assert!(milestone_rates(&store, "proj-1").await.is_empty());
    }

    // ------------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------------

    /// Aggregates with fixed values or injected failures.
    pub(crate) struct FakeAggregates {
        pub target: Result<i64>,
        pub sum: Result<i64>,
    }

    #[async_trait]
    impl Aggregates for FakeAggregates {
        async fn monthly_target(&self, _: &CancellationToken, _: &str) -> Result<i64> {
            self.target.clone()
        }

        async fn current_month_sum(&self, _: &CancellationToken, _: &str) -> Result<i64> {
            self.sum.clone()
        }

        async fn monthly_sums(&self, _: &CancellationToken, _: &str) -> Result<Vec<MonthlySum>> {
            Ok(Vec::new())
        }
    }

    /// Activity log recording inserts, with per-threshold failures.
    #[derive(Default)]
    pub(crate) struct RecordingLog {
        pub inserted: Mutex<Vec<NewActivity>>,
        pub fail_exists_for: Option<i32>,
        pub fail_insert_for: Option<i32>,
        pub fail_all_inserts: bool,
    }

    impl RecordingLog {
        fn inserted_rates(&self) -> Vec<i32> {
            self.inserted
                .lock()
                .unwrap()
                .iter()
                .filter_map(|a| a.rate)
                .collect()
        }
    }

    #[async_trait]
    impl ActivityLog for RecordingLog {
        async fn insert(&self, _: &CancellationToken, activity: NewActivity) -> Result<String> {
            if self.fail_all_inserts
                || (activity.rate.is_some() && activity.rate == self.fail_insert_for)
            {
                return Err(store_fault("activities.insert"));
            }
            let mut inserted = self.inserted.lock().unwrap();
            inserted.push(activity);
            Ok(format!("act-{}", inserted.len()))
        }

        async fn exists_milestone_this_month(
            &self,
            _: &CancellationToken,
            project_id: &str,
            rate: i32,
        ) -> Result<bool> {
            if Some(rate) == self.fail_exists_for {
                return Err(store_fault("activities.exists_milestone"));
            }
            Ok(self
                .inserted
                .lock()
                .unwrap()
                .iter()
                .any(|a| a.project_id == project_id && a.rate == Some(rate)))
        }

        async fn list_global(&self, _: &CancellationToken, _: i64) -> Result<Vec<ActivityItem>> {
            Ok(Vec::new())
        }

        async fn list_by_project(
            &self,
            _: &CancellationToken,
            _: &str,
            _: i64,
        ) -> Result<Vec<ActivityItem>> {
            Ok(Vec::new())
        }
    }

    fn observer_with(aggregates: FakeAggregates, log: Arc<RecordingLog>) -> MilestoneObserver {
        MilestoneObserver::new(Arc::new(aggregates), log)
    }

    #[tokio::test]
    async fn test_target_failure_is_swallowed() {
        let log = Arc::new(RecordingLog::default());
        let observer = observer_with(
            FakeAggregates {
                target: Err(store_fault("projects.monthly_target")),
                sum: Ok(10_000),
            },
            log.clone(),
        );

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();
        assert!(log.inserted_rates().is_empty());
    }

    #[tokio::test]
    async fn test_sum_failure_is_swallowed() {
        let log = Arc::new(RecordingLog::default());
        let observer = observer_with(
            FakeAggregates {
                target: Ok(10_000),
                sum: Err(store_fault("donations.current_month_sum")),
            },
            log.clone(),
        );

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();
        assert!(log.inserted_rates().is_empty());
    }

    #[tokio::test]
    async fn test_exists_failure_on_one_threshold_does_not_suppress_other() {
        let log = Arc::new(RecordingLog {
            fail_exists_for: Some(100),
            ..Default::default()
        });
        let observer = observer_with(
            FakeAggregates {
                target: Ok(10_000),
                sum: Ok(12_000),
            },
            log.clone(),
        );

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();
        assert_eq!(log.inserted_rates(), vec![50]);
    }

    #[tokio::test]
    async fn test_insert_failure_on_one_threshold_does_not_suppress_other() {
        let log = Arc::new(RecordingLog {
            fail_insert_for: Some(100),
            ..Default::default()
        });
        let observer = observer_with(
            FakeAggregates {
                target: Ok(10_000),
                sum: Ok(10_000),
            },
            log.clone(),
        );

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();
        assert_eq!(log.inserted_rates(), vec![50]);
    }

    #[tokio::test]
    async fn test_negative_sum_treated_as_zero() {
        let log = Arc::new(RecordingLog::default());
        let observer = observer_with(
            FakeAggregates {
                target: Ok(10_000),
                sum: Ok(-50_000),
            },
            log.clone(),
        );

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();
        assert!(log.inserted_rates().is_empty());
    }

    #[tokio::test]
    async fn test_milestone_events_are_system_emitted() {
        let log = Arc::new(RecordingLog::default());
        let observer = observer_with(
            FakeAggregates {
                target: Ok(100),
                sum: Ok(250),
            },
            log.clone(),
        );

        observer
            .notify_donation(&CancellationToken::new(), "proj-1")
            .await
            .unwrap();

        let inserted = log.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[0], NewActivity::milestone("proj-1", 100));
        assert_eq!(inserted[1], NewActivity::milestone("proj-1", 50));
        assert!(inserted.iter().all(|a| a.actor_id.is_none() && a.amount.is_none()));
    }
}
