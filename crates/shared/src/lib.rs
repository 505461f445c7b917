//! Pagecraft Shared Types and Utilities
//!
//! This crate contains the domain types and database helpers shared between
//! the billing engine and the background worker.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
