pub mod directory;
pub mod invitation;

pub use directory::{DirectoryRepository, PgDirectoryRepository};
pub use invitation::{InvitationRepository, PgInvitationRepository};
