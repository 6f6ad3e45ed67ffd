//! Per-entity database access
//!
//! Functions take any SQLite executor so the same query runs against the
//! pool or inside a transaction (`&mut *tx`).

pub mod audit;
pub mod events;
pub mod file_versions;
pub mod sessions;
pub mod sources;
pub mod temp_uploads;
pub mod themes;
pub mod users;
