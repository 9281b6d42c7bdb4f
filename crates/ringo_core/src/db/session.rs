//! Session handle and transactional scope helper.
//!
//! # Responsibility
//! - Wrap one migrated connection as the unit-of-work handle used by CRUD.
//! - Generate entity SQL from static field descriptors.
//! - Commit on success, roll back on failure, release on scope exit.
//!
//! # Invariants
//! - A closed session rejects every operation with `SessionClosed`.
//! - `created`, `id` and `uuid` are never part of an UPDATE statement.
//! - Column names in generated SQL only come from declared descriptors.

use crate::db::migrations::{current_user_version, latest_version};
use crate::model::entity::{Entity, EntityMeta, FieldKind, FieldValue, ValueMap};
use crate::repo::crud::{CrudError, CrudResult};
use crate::repo::filter::ParsedSearch;
use log::{debug, error};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::cell::Cell;

/// How [`session_scope`] leaves the session once the unit of work ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    /// Release the session; later use fails with `SessionClosed`.
    Close,
    /// Keep the session usable for further scopes.
    KeepOpen,
}

/// Unit-of-work handle over a borrowed SQLite connection.
///
/// Not `Sync`: callers serialize access, typically one session per request.
pub struct Session<'conn> {
    conn: &'conn Connection,
    closed: Cell<bool>,
}

impl<'conn> Session<'conn> {
    /// Wraps a connection whose schema is fully migrated.
    ///
    /// # Errors
    /// - `UninitializedConnection` when the schema version lags this binary.
    pub fn try_new(conn: &'conn Connection) -> CrudResult<Self> {
        let actual_version = current_user_version(conn)?;
        let expected_version = latest_version();
        if actual_version < expected_version {
            return Err(CrudError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }

        Ok(Self {
            conn,
            closed: Cell::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Releases cached statements and marks the session closed.
    pub fn close(&self) {
        if !self.closed.replace(true) {
            self.conn.flush_prepared_statement_cache();
            debug!("event=session_close module=db status=ok");
        }
    }

    /// Underlying connection, as long as the session is open.
    pub fn connection(&self) -> CrudResult<&'conn Connection> {
        self.ensure_open()?;
        Ok(self.conn)
    }

    pub fn ensure_open(&self) -> CrudResult<()> {
        if self.is_closed() {
            return Err(CrudError::SessionClosed);
        }
        Ok(())
    }

    /// Inserts a new entity and assigns its store identifier.
    pub fn add<E: Entity>(&self, entity: &mut E) -> CrudResult<()> {
        let conn = self.connection()?;
        if let Some(id) = entity.id() {
            return Err(CrudError::InvalidArgument(format!(
                "{} {id} is already persisted",
                E::NAME
            )));
        }

        let values = entity.get_values(None);
        let columns: Vec<&str> = E::descriptors()
            .filter(|field| field.name != "id")
            .map(|field| field.name)
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders});",
            E::TABLE,
            columns.join(", ")
        );
        let binds = columns.iter().map(|column| bind_value(values.get(*column)));

        conn.prepare_cached(&sql)?.execute(params_from_iter(binds))?;
        entity.meta_mut().id = Some(conn.last_insert_rowid());
        Ok(())
    }

    /// Flushes the mutable state of a persisted entity.
    pub fn save<E: Entity>(&self, entity: &E) -> CrudResult<()> {
        let conn = self.connection()?;
        let id = persisted_id(entity)?;

        let values = entity.get_values(None);
        let columns: Vec<&str> = std::iter::once("updated")
            .chain(E::FIELDS.iter().map(|field| field.name))
            .collect();
        let assignments = columns
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {assignments} WHERE id = ?;", E::TABLE);
        let binds = columns
            .iter()
            .map(|column| bind_value(values.get(*column)))
            .chain(std::iter::once(Value::Integer(id)));

        let changed = conn.prepare_cached(&sql)?.execute(params_from_iter(binds))?;
        if changed == 0 {
            return Err(CrudError::NotFound {
                entity: E::NAME,
                id,
            });
        }
        Ok(())
    }

    /// Removes a persisted entity from the store.
    pub fn delete<E: Entity>(&self, entity: &E) -> CrudResult<()> {
        let conn = self.connection()?;
        let id = persisted_id(entity)?;

        let sql = format!("DELETE FROM {} WHERE id = ?1;", E::TABLE);
        let changed = conn.prepare_cached(&sql)?.execute([id])?;
        if changed == 0 {
            return Err(CrudError::NotFound {
                entity: E::NAME,
                id,
            });
        }
        Ok(())
    }

    /// Loads every row whose identifier equals `id`.
    pub fn select_by_id<E: Entity>(&self, id: i64) -> CrudResult<Vec<E>> {
        let conn = self.connection()?;
        let sql = format!("{} WHERE id = ?1;", select_sql::<E>());
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query([id])?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row::<E>(row)?);
        }
        Ok(entities)
    }

    /// Runs an already validated search.
    pub fn select<E: Entity>(&self, search: &ParsedSearch) -> CrudResult<Vec<E>> {
        let conn = self.connection()?;
        let mut sql = format!("{} WHERE 1 = 1", select_sql::<E>());
        let mut bind_values: Vec<Value> = Vec::new();

        for clause in &search.clauses {
            sql.push_str(&format!(" AND {} = ?", clause.field.name));
            bind_values.push(bind_value(Some(&clause.value)));
        }

        let ordering = search
            .sort
            .iter()
            .map(|key| {
                format!(
                    "{} {}",
                    key.field.name,
                    if key.descending { "DESC" } else { "ASC" }
                )
            })
            .chain(std::iter::once("id ASC".to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {ordering}"));

        if let Some(limit) = search.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if search.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(search.offset)));
            }
        } else if search.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(search.offset)));
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row::<E>(row)?);
        }
        Ok(entities)
    }

    /// Number of stored rows of type `E`.
    pub fn count<E: Entity>(&self) -> CrudResult<i64> {
        let conn = self.connection()?;
        let sql = format!("SELECT COUNT(*) FROM {};", E::TABLE);
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Runs `work` inside a transaction on `session`.
///
/// Commits when `work` returns `Ok`. When it returns `Err` the transaction is
/// rolled back and the error is returned unchanged. A failing commit rolls
/// back and surfaces as the store error. Afterwards the session is closed
/// unless `exit` is [`ScopeExit::KeepOpen`].
pub fn session_scope<'conn, T, E, F>(
    session: &Session<'conn>,
    exit: ScopeExit,
    work: F,
) -> Result<T, E>
where
    F: FnOnce(&Session<'conn>) -> Result<T, E>,
    E: From<CrudError>,
{
    let result = run_in_transaction(session, work);
    if exit == ScopeExit::Close {
        session.close();
    }
    result
}

fn run_in_transaction<'conn, T, E, F>(session: &Session<'conn>, work: F) -> Result<T, E>
where
    F: FnOnce(&Session<'conn>) -> Result<T, E>,
    E: From<CrudError>,
{
    let conn = session.connection()?;
    let tx = conn.unchecked_transaction().map_err(CrudError::from)?;

    match work(session) {
        Ok(value) => {
            // Dropping a failed commit rolls the transaction back.
            tx.commit().map_err(CrudError::from)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                error!(
                    "event=session_rollback module=db status=error error={}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}

fn persisted_id<E: Entity>(entity: &E) -> CrudResult<i64> {
    entity.id().ok_or_else(|| {
        CrudError::InvalidArgument(format!("{} has not been persisted yet", E::NAME))
    })
}

fn select_sql<E: Entity>() -> String {
    let columns = E::descriptors()
        .map(|field| field.name)
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {columns} FROM {}", E::TABLE)
}

fn parse_entity_row<E: Entity>(row: &Row<'_>) -> CrudResult<E> {
    let mut values = ValueMap::new();
    for field in E::descriptors() {
        let value: FieldValue = match field.kind {
            FieldKind::Integer | FieldKind::Timestamp => {
                row.get::<_, Option<i64>>(field.name)?.into()
            }
            FieldKind::Text | FieldKind::Uuid => row.get::<_, Option<String>>(field.name)?.into(),
        };
        if matches!(value, FieldValue::Null) && !field.nullable {
            return Err(CrudError::InvalidData(format!(
                "null value in non-nullable column {}.{}",
                E::TABLE,
                field.name
            )));
        }
        values.insert(field.name.to_string(), value);
    }

    let meta = EntityMeta::restore(&values)?;
    E::construct(meta, &values)
}

fn bind_value(value: Option<&FieldValue>) -> Value {
    match value {
        Some(FieldValue::Integer(value)) => Value::Integer(*value),
        Some(FieldValue::Text(value)) => Value::Text(value.clone()),
        Some(FieldValue::Null) | None => Value::Null,
    }
}
