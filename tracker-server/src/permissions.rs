//! Capability checks
//!
//! The only place that decides what a user may do. Extractors in
//! `api::auth` call these; handlers never inspect role flags themselves.

use tracker_common::db::User;

/// Create, edit, archive and restore themes, events and sources
pub fn can_mutate(user: &User) -> bool {
    user.is_active && (user.is_staff || user.is_superuser)
}

/// Hard deletes and audit log access
pub fn can_delete(user: &User) -> bool {
    user.is_active && user.is_superuser
}
