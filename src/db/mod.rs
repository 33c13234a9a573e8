//! Database module: row mapping helpers and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models and row/time conversion helpers.
//! - `repo`: SQL-only functions that map rows into domain entities.
//!
//! External modules should import from `content_jobs::db`; the repository API
//! is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{from_millis, to_millis, ScheduleCounts};
