// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for appstore-state.
//!
//! Every variant carries a stable code (see [`StoreError::error_code`]) so the
//! deployment layer can map store failures onto its own error kinds.

use std::fmt;

/// Result type using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the release state store.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum StoreError {
    /// Application row was not found.
    AppNotFound {
        /// The application id.
        app_id: i64,
    },

    /// An active application with the same name already exists.
    AppAlreadyExists {
        /// The conflicting application name.
        app_name: String,
    },

    /// Installed app was not found (or is no longer active).
    InstalledAppNotFound {
        /// The installed app id.
        installed_app_id: i64,
    },

    /// Installed app version was not found.
    InstalledAppVersionNotFound {
        /// The installed app version id (0 when looked up by installation).
        installed_app_version_id: i64,
    },

    /// Deployment history row was not found.
    HistoryNotFound {
        /// The history id.
        history_id: i64,
    },

    /// A unique index rejected the write.
    UniqueViolation {
        /// Constraint details reported by the database.
        details: String,
    },

    /// A stored column held a value outside its taxonomy.
    InvalidColumnValue {
        /// Column name.
        column: &'static str,
        /// Offending value.
        value: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AppNotFound { .. } => "APP_NOT_FOUND",
            Self::AppAlreadyExists { .. } => "APP_ALREADY_EXISTS",
            Self::InstalledAppNotFound { .. } => "INSTALLED_APP_NOT_FOUND",
            Self::InstalledAppVersionNotFound { .. } => "INSTALLED_APP_VERSION_NOT_FOUND",
            Self::HistoryNotFound { .. } => "HISTORY_NOT_FOUND",
            Self::UniqueViolation { .. } => "UNIQUE_VIOLATION",
            Self::InvalidColumnValue { .. } => "INVALID_COLUMN_VALUE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether the error means a requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AppNotFound { .. }
                | Self::InstalledAppNotFound { .. }
                | Self::InstalledAppVersionNotFound { .. }
                | Self::HistoryNotFound { .. }
        )
    }

    /// Whether the error is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AppAlreadyExists { .. } | Self::UniqueViolation { .. }
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppNotFound { app_id } => write!(f, "App '{}' not found", app_id),
            Self::AppAlreadyExists { app_name } => {
                write!(f, "app already exists with name {}", app_name)
            }
            Self::InstalledAppNotFound { installed_app_id } => {
                write!(f, "Installed app '{}' not found", installed_app_id)
            }
            Self::InstalledAppVersionNotFound {
                installed_app_version_id,
            } => {
                write!(
                    f,
                    "Installed app version '{}' not found",
                    installed_app_version_id
                )
            }
            Self::HistoryNotFound { history_id } => {
                write!(f, "Deployment history '{}' not found", history_id)
            }
            Self::UniqueViolation { details } => {
                write!(f, "Unique constraint violated: {}", details)
            }
            Self::InvalidColumnValue { column, value } => {
                write!(f, "Invalid value '{}' in column '{}'", value, column)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error()
            && db_err.is_unique_violation()
        {
            return StoreError::UniqueViolation {
                details: db_err.message().to_string(),
            };
        }
        StoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
