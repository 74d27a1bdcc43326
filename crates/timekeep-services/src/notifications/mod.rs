mod broadcast;
mod email;

pub use broadcast::BroadcastNotificationSink;
pub use email::SmtpInvitationMailer;
