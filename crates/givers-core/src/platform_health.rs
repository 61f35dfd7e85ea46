// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform-health reader for the dashboard.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::model::PlatformHealthReport;
use crate::persistence::PlatformHealthStore;

/// Reads the platform-health singleton and derives rate and signal.
#[derive(Clone)]
pub struct PlatformHealthReader {
    store: Arc<dyn PlatformHealthStore>,
}

impl PlatformHealthReader {
    pub fn new(store: Arc<dyn PlatformHealthStore>) -> Self {
        Self { store }
    }

    /// Current record with `rate` and `signal` recomputed on every call.
    #[instrument(skip_all)]
    pub async fn get(&self, cancel: &CancellationToken) -> Result<PlatformHealthReport> {
        let report = PlatformHealthReport::from(self.store.get(cancel).await?);
        debug!(rate = report.rate, signal = %report.signal, "Platform health read");
        Ok(report)
    }
}
