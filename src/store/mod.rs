//! Persistence layer — follow-up records and templates behind an async trait.

pub mod libsql_store;
pub mod migrations;
pub mod traits;

pub use libsql_store::LibSqlStore;
pub use traits::{EmailTemplate, FollowUpStore};
