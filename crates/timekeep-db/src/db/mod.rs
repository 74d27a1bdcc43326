//! Database repositories for data access layer
//!
//! Repositories are organized into control/ (organizations, users, invitations) and
//! tracking/ (projects, tasks, time entries). Each module defines the repository trait
//! the services depend on and its PostgreSQL implementation.
//
// Directory and invitation repositories
pub mod control;
//
// Project, task and time entry repositories
pub mod tracking;
//
// In-memory implementation of every repository trait
pub mod memory;
//
// Transaction utilities
pub mod transaction;

pub use control::{
    DirectoryRepository, InvitationRepository, PgDirectoryRepository, PgInvitationRepository,
};
pub use memory::InMemoryStore;
pub use tracking::{
    EntryTotals, OpenInsert, PgProjectRepository, PgTimeEntryRepository, ProjectRepository,
    TimeEntryRepository,
};
