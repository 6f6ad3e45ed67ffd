//! # Risk Tracker Common Library
//!
//! Shared code for the risk tracker service including:
//! - Database schema, migrations and entity records
//! - Static taxonomy tables (business lines, risk taxonomy levels 1-3)
//! - Configuration loading
//! - Token and timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod taxonomy;
pub mod time;
pub mod tokens;

pub use error::{Error, Result};
