//! Public user API.
//!
//! # Responsibility
//! - Bind the generic CRUD dispatcher to [`User`].
//! - Run every call in its own session scope and return plain value mappings.
//!
//! # Invariants
//! - Entities are converted to value mappings before the scope closes.
//! - Returned mappings never contain the password hash.
//! - Plaintext passwords are only returned by `reset_password`, once.

use crate::db::{session_scope, ScopeExit, Session};
use crate::logging::{log_proctime, LogCategory};
use crate::model::entity::{Entity, FieldValue, ValueMap};
use crate::model::user::User;
use crate::repo::crud::{self, CrudError, CrudResult};
use crate::repo::filter::{parse_field_selection, FilterClause, ParsedSearch, SearchQuery};
use crate::security::{generate_password, verify_password, DEFAULT_PASSWORD_LENGTH};
use log::info;
use rusqlite::Connection;

/// Search request for the user listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSearch {
    pub query: SearchQuery,
    /// Pipe-separated field selection, e.g. `id|name`.
    pub fields: Option<String>,
}

/// Use-case entry points for user accounts.
pub struct UserService<'conn> {
    conn: &'conn Connection,
    correlation_id: Option<String>,
}

impl<'conn> UserService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            correlation_id: None,
        }
    }

    /// Tags every emitted event with `correlation_id`.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Creates a user from a name and a plaintext password.
    pub fn create(&self, name: &str, password: &str) -> CrudResult<ValueMap> {
        let mut values = ValueMap::new();
        values.insert("name".to_string(), FieldValue::from(name));
        values.insert("password".to_string(), FieldValue::from(password));

        self.in_scope("user_create", |session| {
            let user: User = crud::create(session, values)?;
            Ok(user.public_values(None))
        })
    }

    pub fn read(&self, id: i64) -> CrudResult<ValueMap> {
        self.in_scope("user_read", |session| {
            let user: User = crud::read(session, id)?;
            Ok(user.public_values(None))
        })
    }

    /// Applies a partial update; unknown keys and null values are ignored.
    pub fn update(&self, id: i64, values: &ValueMap) -> CrudResult<ValueMap> {
        self.in_scope("user_update", |session| {
            let user: User = crud::update(session, id, values)?;
            Ok(user.public_values(None))
        })
    }

    pub fn delete(&self, id: i64) -> CrudResult<()> {
        self.in_scope("user_delete", |session| crud::delete::<User>(session, id))
    }

    /// Sets a new password and returns it in plaintext.
    ///
    /// Without `password` a random one of [`DEFAULT_PASSWORD_LENGTH`]
    /// characters is generated. The caller must capture the result; it cannot
    /// be retrieved again.
    pub fn reset_password(&self, id: i64, password: Option<&str>) -> CrudResult<String> {
        let new_password = password
            .map(str::to_string)
            .unwrap_or_else(|| generate_password(DEFAULT_PASSWORD_LENGTH));

        let mut values = ValueMap::new();
        values.insert(
            "password".to_string(),
            FieldValue::Text(new_password.clone()),
        );
        self.in_scope("user_reset_password", |session| {
            crud::update::<User>(session, id, &values).map(|_| ())
        })?;

        info!(
            "event=user_reset_password category={} status=ok id={} generated={}",
            LogCategory::Auth,
            id,
            password.is_none()
        );
        Ok(new_password)
    }

    /// Lists users as value mappings restricted to the selected fields.
    pub fn search(&self, request: &UserSearch) -> CrudResult<Vec<ValueMap>> {
        let selection = parse_field_selection(request.fields.as_deref());
        self.in_scope("user_search", |session| {
            let users: Vec<User> = crud::search(session, &request.query)?;
            let subset: Option<Vec<&str>> = selection
                .as_ref()
                .map(|names| names.iter().map(String::as_str).collect());
            Ok(users
                .iter()
                .map(|user| user.public_values(subset.as_deref()))
                .collect())
        })
    }

    /// Checks a name/password pair against the stored hash.
    ///
    /// Unknown names verify as `false`.
    pub fn verify_credentials(&self, name: &str, password: &str) -> CrudResult<bool> {
        let field = User::field("name").ok_or_else(|| {
            CrudError::InvalidData("User schema lacks a name field".to_string())
        })?;
        let search = ParsedSearch {
            clauses: vec![FilterClause {
                field,
                value: FieldValue::from(name),
            }],
            sort: Vec::new(),
            limit: Some(1),
            offset: 0,
        };

        let verified = self.in_scope("user_verify_credentials", |session| {
            let users: Vec<User> = session.select(&search)?;
            Ok(users
                .first()
                .is_some_and(|user| verify_password(password, user.password_hash())))
        })?;

        info!(
            "event=user_verify_credentials category={} status=ok verified={}",
            LogCategory::Auth,
            verified
        );
        Ok(verified)
    }

    fn in_scope<T>(
        &self,
        operation: &str,
        work: impl FnOnce(&Session<'conn>) -> CrudResult<T>,
    ) -> CrudResult<T> {
        log_proctime(operation, self.correlation_id.as_deref(), || {
            let session = Session::try_new(self.conn)?;
            session_scope(&session, ScopeExit::Close, work)
        })
    }
}
