//! SQLite persistence for workflows, reviews, trace links and the audit trail.

pub mod db;

pub use db::{DbHandle, GateDb, Scope};
