// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellation at store round-trip boundaries.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{GiversError, Result};

/// Run `operation` unless `cancel` fires first.
///
/// A token that is already cancelled short-circuits before the future is
/// polled. A write interrupted mid-flight may or may not have committed.
pub async fn guard<T, F>(cancel: &CancellationToken, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(GiversError::Cancelled { operation }),

        result = fut => result,
    }
}
