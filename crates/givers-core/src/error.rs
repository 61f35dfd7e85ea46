// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for givers-core.
//!
//! Every component surfaces one discriminated error type; callers branch on
//! [`GiversError::kind`] rather than on message text.

use thiserror::Error;

/// Result type using GiversError
pub type Result<T> = std::result::Result<T, GiversError>;

/// Discriminant of a [`GiversError`], for callers that only need the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested row does not exist.
    NotFound,
    /// The payment processor re-delivered a notification that was already stored.
    DuplicateExternalPaymentId,
    /// The acting user does not own the resource.
    Forbidden,
    /// Caller-supplied input failed validation.
    InvalidArgument,
    /// The operation's cancellation handle fired.
    Cancelled,
    /// Any other failure from the persistent store.
    StoreFault,
}

/// Errors that can occur in the donation, activity and health components.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GiversError {
    /// Row was not found.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Table or entity name.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A donation with the same external payment id already exists.
    #[error("donation with external payment id '{external_payment_id}' already exists")]
    DuplicateExternalPaymentId {
        /// The duplicated payment id.
        external_payment_id: String,
    },

    /// The acting user may not touch this resource.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Why access was denied.
        reason: String,
    },

    /// Input validation failed.
    #[error("invalid argument '{field}': {message}")]
    InvalidArgument {
        /// The field that failed validation.
        field: &'static str,
        /// The validation error message.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("operation '{operation}' was cancelled")]
    Cancelled {
        /// The operation that was interrupted.
        operation: &'static str,
    },

    /// Persistent-store failure.
    #[error("store fault during '{operation}': {details}")]
    StoreFault {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl GiversError {
    /// Shorthand for an [`GiversError::InvalidArgument`].
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a [`GiversError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateExternalPaymentId { .. } => ErrorKind::DuplicateExternalPaymentId,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::StoreFault { .. } => ErrorKind::StoreFault,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::DuplicateExternalPaymentId => "DUPLICATE_EXTERNAL_PAYMENT_ID",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::StoreFault => "STORE_FAULT",
        }
    }
}

impl From<sqlx::Error> for GiversError {
    fn from(err: sqlx::Error) -> Self {
        GiversError::StoreFault {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for GiversError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        GiversError::StoreFault {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

/// Whether a driver error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
