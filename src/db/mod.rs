//! Local run history: what each finished batch sent and what failed.
//!
//! - `model`: typed rows returned by the repository.
//! - `repo`: SQL-only functions over the SQLite pool.
//!
//! Callers import from `camp_mailer::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewRun, RunItem, RunSummary};
