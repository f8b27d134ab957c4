//! Shared domain types for the oxtrack error-tracking engine.
//!
//! Events, issues, alert rules, notification records, and the distributed
//! alert-lock record are defined here and consumed by every other crate.

pub mod id;
pub mod types;
