//! Process configuration read once from the environment.
//!
//! # Responsibility
//! - Resolve the store location from a SQLAlchemy-style connection string.
//! - Resolve logging level, target and service name.
//!
//! # Invariants
//! - Configuration is an explicit value passed to entry points; nothing here
//!   caches global state.

use crate::db::{open_location, DbLocation, DbResult};
use crate::logging::{default_log_level, LogTarget};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_URI: &str = "RINGO_DB_URI";
pub const ENV_LOG_LEVEL: &str = "RINGO_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "RINGO_LOG_DIR";
pub const ENV_SERVICE_NAME: &str = "RINGO_SERVICE_NAME";

pub const DEFAULT_DB_URI: &str = "sqlite:///:memory:";
pub const DEFAULT_SERVICE_NAME: &str = "ringo_core";

const SQLITE_SCHEME: &str = "sqlite://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnsupportedUri(String),
    InvalidValue { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedUri(uri) => {
                write!(f, "unsupported database uri `{uri}`; expected sqlite:///<path>")
            }
            Self::InvalidValue { key, message } => write!(f, "invalid {key}: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Core settings shared by every entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub db: DbLocation,
    pub log_level: String,
    pub log_target: LogTarget,
    pub service_name: String,
}

impl CoreConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let uri = lookup(ENV_DB_URI).unwrap_or_else(|| DEFAULT_DB_URI.to_string());
        let db = parse_db_uri(&uri)?;

        let log_level = lookup(ENV_LOG_LEVEL)
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| default_log_level().to_string());

        let log_target = match lookup(ENV_LOG_DIR).filter(|dir| !dir.trim().is_empty()) {
            Some(dir) => {
                let path = PathBuf::from(dir.trim());
                if !path.is_absolute() {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_LOG_DIR,
                        message: format!("`{}` is not an absolute path", path.display()),
                    });
                }
                LogTarget::Directory(path)
            }
            None => LogTarget::Stderr,
        };

        let service_name = lookup(ENV_SERVICE_NAME)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Ok(Self {
            db,
            log_level,
            log_target,
            service_name,
        })
    }

    /// Opens and migrates the configured store.
    pub fn open_store(&self) -> DbResult<Connection> {
        open_location(&self.db)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db: DbLocation::Memory,
            log_level: default_log_level().to_string(),
            log_target: LogTarget::Stderr,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// Parses `sqlite://`, `sqlite:///:memory:`, `sqlite:///relative.db` and
/// `sqlite:////absolute.db`.
pub fn parse_db_uri(uri: &str) -> Result<DbLocation, ConfigError> {
    let trimmed = uri.trim();
    let rest = trimmed
        .strip_prefix(SQLITE_SCHEME)
        .ok_or_else(|| ConfigError::UnsupportedUri(trimmed.to_string()))?;

    if rest.is_empty() {
        return Ok(DbLocation::Memory);
    }
    let path = rest
        .strip_prefix('/')
        .ok_or_else(|| ConfigError::UnsupportedUri(trimmed.to_string()))?;

    match path {
        "" | ":memory:" => Ok(DbLocation::Memory),
        path => Ok(DbLocation::File(PathBuf::from(path))),
    }
}
