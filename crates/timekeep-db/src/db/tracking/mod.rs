pub mod project;
pub mod time_entry;

pub use project::{PgProjectRepository, ProjectRepository};
pub use time_entry::{EntryTotals, OpenInsert, PgTimeEntryRepository, TimeEntryRepository};
