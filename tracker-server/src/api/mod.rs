//! HTTP API handlers

pub mod auth;
pub mod downloads;
pub mod events;
pub mod health;
pub mod sources;
pub mod taxonomy;
pub mod themes;
pub mod uploads;

pub use auth::auth_routes;
pub use downloads::download_routes;
pub use events::event_routes;
pub use health::health_routes;
pub use sources::source_routes;
pub use taxonomy::taxonomy_routes;
pub use themes::theme_routes;
pub use uploads::upload_routes;
