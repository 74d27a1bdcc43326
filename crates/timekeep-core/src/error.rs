//! Error types module
//!
//! All lifecycle failures are unified under the `AppError` enum. Each variant is a
//! typed outcome the calling layer maps onto a response; none of them is fatal to
//! the process.
//!
//! The `StorageUnavailable` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.
//! With `default-features = false` the variant carries a plain message instead.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::policy::Role;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like resource limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// This trait allows errors to self-describe their HTTP response characteristics
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "ACTIVE_ENTRY_EXISTS")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Entity absent, or present in another tenant. The two are never distinguished.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("An active time entry already exists: {entry_id}")]
    ActiveEntryExists { entry_id: Uuid },

    #[error("Active time entry not found")]
    ActiveEntryNotFound,

    #[error("Cannot delete an active time entry: {entry_id}")]
    CannotDeleteActiveEntry { entry_id: Uuid },

    #[error("No active project in organization")]
    NoActiveProject,

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Task not found")]
    TaskNotFound,

    #[error("Invalid time range: end time must be after start time")]
    InvalidTimeRange,

    #[error("Seat limit reached: organization allows {limit} users")]
    SeatLimitReached { limit: i32 },

    #[error("Duplicate invitation: {invitation_id}")]
    DuplicateInvitation {
        invitation_id: Uuid,
        expires_at: DateTime<Utc>,
    },

    #[error("Insufficient permission: {required} role required")]
    InsufficientPermission { required: Role },

    #[error("User already exists (same organization: {in_same_organization})")]
    UserAlreadyExists { in_same_organization: bool },

    #[error("Invalid or expired invitation")]
    InvalidOrExpiredInvitation,

    #[error("Reminder not allowed: {0}")]
    ReminderNotAllowed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        match err {
            SqlxError::RowNotFound => AppError::NotFound("Record not found".to_string()),
            other => AppError::StorageUnavailable(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
/// client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::StorageUnavailable(_) => (
            503,
            "STORAGE_UNAVAILABLE",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::AccessDenied(_) => (
            403,
            "ACCESS_DENIED",
            false,
            Some("Ask a project manager or admin for access"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidState(_) => (
            409,
            "INVALID_STATE",
            false,
            Some("Reload the resource and check its current status"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::ActiveEntryExists { .. } => (
            409,
            "ACTIVE_ENTRY_EXISTS",
            false,
            Some("Stop the active time entry first"),
            false,
            LogLevel::Debug,
        ),
        AppError::ActiveEntryNotFound => (
            404,
            "ACTIVE_ENTRY_NOT_FOUND",
            false,
            Some("Verify the entry is still running"),
            false,
            LogLevel::Debug,
        ),
        AppError::CannotDeleteActiveEntry { .. } => (
            409,
            "CANNOT_DELETE_ACTIVE_ENTRY",
            false,
            Some("Stop the time entry before deleting it"),
            false,
            LogLevel::Debug,
        ),
        AppError::NoActiveProject => (
            404,
            "NO_ACTIVE_PROJECT",
            false,
            Some("Create a project or pass a project ID"),
            false,
            LogLevel::Debug,
        ),
        AppError::ProjectNotFound => (
            404,
            "PROJECT_NOT_FOUND",
            false,
            Some("Verify the project ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::TaskNotFound => (
            404,
            "TASK_NOT_FOUND",
            false,
            Some("Verify the task belongs to the selected project"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidTimeRange => (
            400,
            "INVALID_TIME_RANGE",
            false,
            Some("Use an end time after the start time"),
            false,
            LogLevel::Debug,
        ),
        AppError::SeatLimitReached { .. } => (
            402,
            "SEAT_LIMIT_REACHED",
            false,
            Some("Upgrade plan to add more users"),
            false,
            LogLevel::Warn,
        ),
        AppError::DuplicateInvitation { .. } => (
            409,
            "DUPLICATE_INVITATION",
            false,
            Some("Resend or extend the existing invitation"),
            false,
            LogLevel::Debug,
        ),
        AppError::InsufficientPermission { .. } => (
            403,
            "INSUFFICIENT_PERMISSION",
            false,
            Some("Ask an admin to perform this action"),
            false,
            LogLevel::Debug,
        ),
        AppError::UserAlreadyExists { .. } => (
            409,
            "USER_ALREADY_EXISTS",
            false,
            Some("Contact support to move the account"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidOrExpiredInvitation => (
            400,
            "INVALID_OR_EXPIRED_INVITATION",
            false,
            Some("Ask for a new invitation"),
            false,
            LogLevel::Debug,
        ),
        AppError::ReminderNotAllowed(_) => (
            429,
            "REMINDER_NOT_ALLOWED",
            false,
            Some("Wait 24 hours between reminders"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::StorageUnavailable(_) => "StorageUnavailable",
            AppError::NotFound(_) => "NotFound",
            AppError::AccessDenied(_) => "AccessDenied",
            AppError::InvalidState(_) => "InvalidState",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::ActiveEntryExists { .. } => "ActiveEntryExists",
            AppError::ActiveEntryNotFound => "ActiveEntryNotFound",
            AppError::CannotDeleteActiveEntry { .. } => "CannotDeleteActiveEntry",
            AppError::NoActiveProject => "NoActiveProject",
            AppError::ProjectNotFound => "ProjectNotFound",
            AppError::TaskNotFound => "TaskNotFound",
            AppError::InvalidTimeRange => "InvalidTimeRange",
            AppError::SeatLimitReached { .. } => "SeatLimitReached",
            AppError::DuplicateInvitation { .. } => "DuplicateInvitation",
            AppError::InsufficientPermission { .. } => "InsufficientPermission",
            AppError::UserAlreadyExists { .. } => "UserAlreadyExists",
            AppError::InvalidOrExpiredInvitation => "InvalidOrExpiredInvitation",
            AppError::ReminderNotAllowed(_) => "ReminderNotAllowed",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::StorageUnavailable(_) => "Failed to access storage".to_string(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::AccessDenied(ref msg) => msg.clone(),
            AppError::InvalidState(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::ActiveEntryExists { entry_id } => format!(
                "You already have an active time entry ({}). Please stop it first.",
                entry_id
            ),
            AppError::ActiveEntryNotFound => "Active time entry not found".to_string(),
            AppError::CannotDeleteActiveEntry { .. } => {
                "Cannot delete a running time entry. Stop it first.".to_string()
            }
            AppError::NoActiveProject => {
                "No active project found. Create a project first.".to_string()
            }
            AppError::ProjectNotFound => "Project not found".to_string(),
            AppError::TaskNotFound => "Task not found".to_string(),
            AppError::InvalidTimeRange => "End time must be after start time".to_string(),
            AppError::SeatLimitReached { limit } => format!(
                "Organization has reached maximum user limit of {}. Please upgrade your plan to invite more users.",
                limit
            ),
            AppError::DuplicateInvitation { expires_at, .. } => format!(
                "An active invitation has already been sent to this email address (expires {})",
                expires_at.to_rfc3339()
            ),
            AppError::InsufficientPermission { required } => match required {
                Role::Admin => {
                    "Managers can only invite users. Contact an admin to invite managers or admins."
                        .to_string()
                }
                other => format!("This action requires the {} role", other),
            },
            AppError::UserAlreadyExists {
                in_same_organization: true,
            } => "User is already a member of your organization".to_string(),
            AppError::UserAlreadyExists {
                in_same_organization: false,
            } => "User already has an account with another organization. They need to contact support to join your organization.".to_string(),
            AppError::InvalidOrExpiredInvitation => "Invalid or expired invitation".to_string(),
            AppError::ReminderNotAllowed(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}
