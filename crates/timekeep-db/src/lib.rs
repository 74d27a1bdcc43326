//! Persistence for the timekeep lifecycles.
//!
//! Repository traits with PostgreSQL implementations plus an in-memory store
//! that implements every trait behind a single lock.

pub mod db;

pub use db::*;
