//! Timekeep Services Layer
//!
//! Lifecycle services for time tracking and invitations, derived statistics,
//! reports, the invitation expiry sweep and the notification transports.
//! Callers hand in an already-authenticated [`timekeep_core::Actor`]; request
//! parsing and authentication stay outside this crate.

pub mod context;
pub mod invitations;
pub mod notifications;
pub mod stats;
pub mod time_tracking;

pub use context::Repositories;
pub use invitations::{InvitationService, InvitationServiceConfig, InvitationSweepService};
pub use notifications::{BroadcastNotificationSink, SmtpInvitationMailer};
pub use stats::StatsService;
pub use time_tracking::{ReportService, TimeTrackingService};
