//! HTTP endpoint mapping for the Ringo user API.

pub mod config;
pub mod routes;

pub use config::ServerConfig;
pub use routes::{router, AppState};
