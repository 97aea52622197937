//! Multisite Shared Types and Utilities
//!
//! Site and alias records, the persistence error type and Postgres helpers
//! shared by the multisite crates.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
