//! Core types and trait definitions for the Ward object store.
//!
//! Nothing here touches a database or the network. The crate
//! holds the polymorphic [`target::TargetRef`], the role/permission model,
//! the link and appearance types, the filter mini-language compiler and the
//! storage traits every backend implements.

pub mod appearance;
pub mod audit;
pub mod error;
pub mod filter;
pub mod link;
pub mod permission;
pub mod policy;
pub mod record;
pub mod search;
pub mod store;
pub mod target;

pub use error::{Error, Result};
