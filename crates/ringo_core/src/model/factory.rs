//! Per-type factories that construct new entities and load stored ones.
//!
//! # Responsibility
//! - Define the `EntityFactory` contract used by the CRUD dispatcher.
//! - Provide `DefaultFactory`, the plain construct-and-load implementation.
//!
//! # Invariants
//! - `create` never touches the store; the returned instance is unattached.
//! - `load` returns exactly one row or fails.

use crate::db::Session;
use crate::model::entity::{check_kind, reject_unknown_fields, Entity, EntityMeta, ValueMap};
use crate::repo::crud::{CrudError, CrudResult};
use std::marker::PhantomData;

/// Constructs and loads instances of one entity type.
pub trait EntityFactory<E: Entity> {
    /// Builds a new, unattached instance from caller-supplied values.
    ///
    /// # Errors
    /// - `InvalidArgument` for unknown fields, missing required fields or
    ///   values of the wrong kind.
    fn create(&self, values: ValueMap) -> CrudResult<E>;

    /// Loads the instance whose identifier equals `id`.
    ///
    /// # Errors
    /// - `NotFound` when no row matches.
    fn load(&self, id: i64) -> CrudResult<E>;
}

/// Factory that constructs entities verbatim from the supplied values.
pub struct DefaultFactory<'s, E> {
    session: &'s Session<'s>,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity> DefaultFactory<'s, E> {
    pub fn new(session: &'s Session<'s>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    pub fn session(&self) -> &'s Session<'s> {
        self.session
    }
}

impl<E: Entity> EntityFactory<E> for DefaultFactory<'_, E> {
    fn create(&self, values: ValueMap) -> CrudResult<E> {
        reject_unknown_fields::<E>(&values)?;
        for field in E::FIELDS {
            if let Some(value) = values.get(field.name) {
                check_kind(E::NAME, field, value)?;
            }
        }
        E::construct(EntityMeta::new(), &values)
    }

    fn load(&self, id: i64) -> CrudResult<E> {
        let mut rows = self.session.select_by_id::<E>(id)?;
        match rows.len() {
            0 => Err(CrudError::NotFound {
                entity: E::NAME,
                id,
            }),
            1 => Ok(rows.remove(0)),
            count => Err(CrudError::InvalidData(format!(
                "{count} {} rows share id {id}",
                E::NAME
            ))),
        }
    }
}
