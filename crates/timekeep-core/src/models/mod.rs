//! Data models for the time tracking and invitation lifecycles.
//!
//! Each sub-module covers one entity; everything is re-exported here.

mod invitation;
mod organization;
mod project;
mod report;
mod task;
mod time_entry;
mod user;

pub use invitation::*;
pub use organization::*;
pub use project::*;
pub use report::*;
pub use task::*;
pub use time_entry::*;
pub use user::*;

pub use crate::policy::Role;
