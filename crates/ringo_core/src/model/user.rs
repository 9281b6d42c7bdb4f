//! User account entity and its credential-hashing factory.
//!
//! # Invariants
//! - `name` is unique across users (enforced by the `users` table).
//! - `password` only ever holds a hash; plaintext input is hashed on the
//!   way in, both at creation and on `set_values`.

use crate::db::Session;
use crate::model::entity::{
    reject_unknown_fields, required_text, Entity, EntityMeta, FieldDescriptor, FieldKind,
    FieldValue, ValueMap,
};
use crate::model::factory::{DefaultFactory, EntityFactory};
use crate::repo::crud::{CrudError, CrudResult};
use crate::security::{hash_password, HashScheme};
use serde::ser::{Serialize, SerializeMap, Serializer};

const USER_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("name", FieldKind::Text),
    FieldDescriptor::new("password", FieldKind::Text).secret(),
];

/// Persisted user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    meta: EntityMeta,
    name: String,
    password: String,
}

impl User {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored credential hash.
    pub fn password_hash(&self) -> &str {
        &self.password
    }
}

impl Entity for User {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";
    const FIELDS: &'static [FieldDescriptor] = USER_FIELDS;

    type Factory<'s> = UserFactory<'s>;

    fn factory<'s>(session: &'s Session<'s>) -> Self::Factory<'s> {
        UserFactory::new(session)
    }

    fn construct(meta: EntityMeta, values: &ValueMap) -> CrudResult<Self> {
        Ok(Self {
            meta,
            name: required_text::<Self>(values, "name")?,
            password: required_text::<Self>(values, "password")?,
        })
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn own_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::Text(self.name.clone())),
            "password" => Some(FieldValue::Text(self.password.clone())),
            _ => None,
        }
    }

    fn assign(&mut self, name: &str, value: FieldValue) -> CrudResult<()> {
        match (name, value) {
            ("name", FieldValue::Text(value)) => self.name = value,
            ("password", FieldValue::Text(plaintext)) => {
                self.password = hash_password(&plaintext, None)?;
            }
            (other, _) => {
                return Err(CrudError::InvalidArgument(format!(
                    "User cannot assign field `{other}`"
                )))
            }
        }
        Ok(())
    }
}

impl Serialize for User {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let values = self.get_values(None);
        let mut map = serializer.serialize_map(Some(values.len()))?;
        for (key, value) in &values {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Factory for [`User`] that hashes the incoming plaintext password.
pub struct UserFactory<'s> {
    inner: DefaultFactory<'s, User>,
    scheme: HashScheme,
}

impl<'s> UserFactory<'s> {
    pub fn new(session: &'s Session<'s>) -> Self {
        Self::with_scheme(session, HashScheme::default())
    }

    pub fn with_scheme(session: &'s Session<'s>, scheme: HashScheme) -> Self {
        Self {
            inner: DefaultFactory::new(session),
            scheme,
        }
    }
}

impl EntityFactory<User> for UserFactory<'_> {
    fn create(&self, mut values: ValueMap) -> CrudResult<User> {
        reject_unknown_fields::<User>(&values)?;
        let plaintext = required_text::<User>(&values, "password")?;
        let hashed = hash_password(&plaintext, Some(self.scheme))?;
        values.insert("password".to_string(), FieldValue::Text(hashed));
        self.inner.create(values)
    }

    fn load(&self, id: i64) -> CrudResult<User> {
        self.inner.load(id)
    }
}

#[cfg(test)]
mod tests {
    use super::User;
    use crate::db::{open_db_in_memory, Session};
    use crate::model::entity::{Entity, FieldValue, ValueMap};
    use crate::model::factory::EntityFactory;
    use crate::repo::crud::CrudError;
    use crate::security::verify_password;

    fn values(pairs: &[(&str, &str)]) -> ValueMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), FieldValue::from(*value)))
            .collect()
    }

    #[test]
    fn factory_hashes_password_on_create() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::try_new(&conn).unwrap();
        let factory = User::factory(&session);

        let user = factory
            .create(values(&[
                ("name", "foo@example.com"),
                ("password", "mysecurepassword"),
            ]))
            .unwrap();

        assert_eq!(user.name(), "foo@example.com");
        assert_ne!(user.password_hash(), "mysecurepassword");
        assert!(verify_password("mysecurepassword", user.password_hash()));
        assert_eq!(user.id(), None);
    }

    #[test]
    fn factory_rejects_unknown_and_missing_fields() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::try_new(&conn).unwrap();
        let factory = User::factory(&session);

        let unknown = factory.create(values(&[("foo", "bar")])).unwrap_err();
        assert!(matches!(unknown, CrudError::InvalidArgument(ref msg) if msg.contains("foo")));

        let missing = factory.create(values(&[("name", "only")])).unwrap_err();
        assert!(matches!(missing, CrudError::InvalidArgument(ref msg) if msg.contains("password")));
    }

    #[test]
    fn fields_lists_base_and_user_fields() {
        assert_eq!(
            User::fields(),
            vec!["id", "uuid", "created", "updated", "name", "password"]
        );
    }

    #[test]
    fn set_values_ignores_unknown_and_null_and_rehashes_password() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::try_new(&conn).unwrap();
        let mut user = User::factory(&session)
            .create(values(&[("name", "a"), ("password", "old")]))
            .unwrap();
        let created = user.meta().created();

        let mut update = values(&[("password", "new"), ("unknown", "x")]);
        update.insert("name".to_string(), FieldValue::Null);
        update.insert("id".to_string(), FieldValue::Integer(77));
        let assigned = user.set_values(&update).unwrap();

        assert_eq!(assigned, 1);
        assert_eq!(user.name(), "a");
        assert_eq!(user.id(), None);
        assert!(verify_password("new", user.password_hash()));
        assert_eq!(user.meta().created(), created);
        assert!(user.meta().updated() > created);
    }

    #[test]
    fn set_values_rejects_wrong_kind() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::try_new(&conn).unwrap();
        let mut user = User::factory(&session)
            .create(values(&[("name", "a"), ("password", "pw")]))
            .unwrap();

        let mut update = ValueMap::new();
        update.insert("name".to_string(), FieldValue::Integer(5));
        assert!(matches!(
            user.set_values(&update),
            Err(CrudError::InvalidArgument(_))
        ));
    }

    #[test]
    fn serialization_matches_get_values() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::try_new(&conn).unwrap();
        let user = User::factory(&session)
            .create(values(&[("name", "serial"), ("password", "pw")]))
            .unwrap();

        let json = serde_json::to_value(&user).unwrap();
        let expected = serde_json::to_value(user.get_values(None)).unwrap();
        assert_eq!(json, expected);
        assert_eq!(json["name"], "serial");
        assert!(json["id"].is_null());
    }

    #[test]
    fn public_values_hide_password_and_honor_subset() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::try_new(&conn).unwrap();
        let user = User::factory(&session)
            .create(values(&[("name", "hidden"), ("password", "pw")]))
            .unwrap();

        let all = user.public_values(None);
        assert!(!all.contains_key("password"));
        assert!(all.contains_key("uuid"));

        let subset = user.get_values(Some(&["name", "nope"]));
        assert_eq!(subset.len(), 1);
        assert_eq!(subset["name"], FieldValue::from("hidden"));
    }
}
