//! Core CRUD layer and user-account model for Ringo.
//! This crate is the single source of truth for entity invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod security;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{session_scope, DbError, DbLocation, ScopeExit, Session};
pub use logging::{
    build_tag, default_log_level, init_logging, log_proctime, log_tag, logging_status,
    LogCategory, LogTarget,
};
pub use model::entity::{Entity, EntityMeta, FieldDescriptor, FieldKind, FieldValue, ValueMap};
pub use model::factory::{DefaultFactory, EntityFactory};
pub use model::user::{User, UserFactory};
pub use repo::crud::{CrudError, CrudResult};
pub use repo::filter::SearchQuery;
pub use security::{generate_password, hash_password, verify_password, HashScheme};
pub use service::user_service::{UserSearch, UserService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
