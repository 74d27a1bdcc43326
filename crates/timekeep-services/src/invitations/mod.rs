mod service;
mod sweep;

pub use service::{InvitationService, InvitationServiceConfig};
pub use sweep::InvitationSweepService;
