//! Relational registry for alert rules, notification channels, webhook
//! endpoints, delivery records, and evaluation locks.
//!
//! All access goes through [`store::Registry`], a SeaORM-backed layer over
//! the management database. The event stream itself lives in the analytics
//! store; this crate only holds configuration and coordination state.

pub mod entities;
pub mod secrets;
pub mod store;


pub use store::{AlertPatch, AlertPage, NewAlert, Registry};
