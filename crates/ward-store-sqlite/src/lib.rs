//! SQLite backend for the Ward object store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod appearance;
mod encode;
mod graph;
mod objects;
mod registry;
mod schema;
mod sql;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use objects::PROMOTION_CONTEXT;
pub use store::{DefaultPermissions, SqliteStore};

#[cfg(test)]
mod tests;
