//! Generic CRUD dispatch over any [`Entity`].
//!
//! # Responsibility
//! - Validate caller input before any store interaction.
//! - Obtain the entity factory, construct/load, mutate/remove and flush.
//! - Translate store-level conditions into `CrudError` variants.
//!
//! # Invariants
//! - Returned instances are attached to the session that produced them and
//!   reflect the flushed state of the current transaction.
//! - No operation commits; committing belongs to `session_scope`.

use crate::db::{DbError, Session};
use crate::model::entity::{Entity, ValueMap};
use crate::model::factory::EntityFactory;
use crate::repo::filter::{ParsedSearch, SearchQuery};
use crate::security::SecurityError;
use log::debug;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CrudResult<T> = Result<T, CrudError>;

/// Error taxonomy of the CRUD layer.
#[derive(Debug)]
pub enum CrudError {
    /// Caller bug: bad id, unknown field, wrong value kind.
    InvalidArgument(String),
    NotFound {
        entity: &'static str,
        id: i64,
    },
    /// Malformed search input.
    ClientError(String),
    /// Store rejected the write (uniqueness, check constraint, ...).
    ConstraintViolation(String),
    SessionClosed,
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    Security(SecurityError),
    InvalidData(String),
    Db(DbError),
}

impl Display for CrudError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::ClientError(message) => write!(f, "invalid request: {message}"),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::SessionClosed => write!(f, "session is closed"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} is older than required {expected_version}"
            ),
            Self::Security(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CrudError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Security(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for CrudError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CrudError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(ref failure, ref message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(
                    message
                        .clone()
                        .unwrap_or_else(|| failure.to_string()),
                )
            }
            other => Self::Db(DbError::Sqlite(other)),
        }
    }
}

impl From<SecurityError> for CrudError {
    fn from(value: SecurityError) -> Self {
        Self::Security(value)
    }
}

/// Creates, adds and flushes a new entity so its `id` becomes available.
pub fn create<E: Entity>(session: &Session<'_>, values: ValueMap) -> CrudResult<E> {
    session.ensure_open()?;
    let factory = E::factory(session);
    let mut instance = factory.create(values)?;
    session.add(&mut instance)?;
    debug!(
        "event=crud_create module=repo status=ok entity={} id={:?}",
        E::NAME,
        instance.id()
    );
    Ok(instance)
}

/// Loads one entity by identifier.
pub fn read<E: Entity>(session: &Session<'_>, id: i64) -> CrudResult<E> {
    validate_id(id)?;
    session.ensure_open()?;
    E::factory(session).load(id)
}

/// Loads an entity, applies a partial update and flushes it.
pub fn update<E: Entity>(session: &Session<'_>, id: i64, values: &ValueMap) -> CrudResult<E> {
    validate_id(id)?;
    session.ensure_open()?;
    let mut instance = E::factory(session).load(id)?;
    let assigned = instance.set_values(values)?;
    session.save(&instance)?;
    debug!(
        "event=crud_update module=repo status=ok entity={} id={} assigned={}",
        E::NAME,
        id,
        assigned
    );
    Ok(instance)
}

/// Loads an entity and removes it from the store.
pub fn delete<E: Entity>(session: &Session<'_>, id: i64) -> CrudResult<()> {
    validate_id(id)?;
    session.ensure_open()?;
    let instance: E = E::factory(session).load(id)?;
    session.delete(&instance)?;
    debug!(
        "event=crud_delete module=repo status=ok entity={} id={}",
        E::NAME,
        id
    );
    Ok(())
}

/// Lists entities matching a conjunctive equality filter.
///
/// # Errors
/// - `ClientError` for malformed filter/sort expressions or unknown fields.
pub fn search<E: Entity>(session: &Session<'_>, query: &SearchQuery) -> CrudResult<Vec<E>> {
    let parsed = ParsedSearch::parse::<E>(query)?;
    session.ensure_open()?;
    session.select::<E>(&parsed)
}

fn validate_id(id: i64) -> CrudResult<()> {
    if id <= 0 {
        return Err(CrudError::InvalidArgument(format!(
            "id must be a positive integer, got {id}"
        )));
    }
    Ok(())
}
