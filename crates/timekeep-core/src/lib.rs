//! Timekeep Core Library
//!
//! Domain models, role policy, error types, configuration and collaborator
//! hooks shared by the repositories, services and worker.

pub mod clock;
pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod policy;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult, ErrorMetadata, LogLevel};
pub use hooks::{
    InvitationEmail, InvitationMailer, NoOpInvitationMailer, NoOpNotificationSink,
    NotificationSink, TrackingEvent,
};
pub use policy::{Actor, Role};
