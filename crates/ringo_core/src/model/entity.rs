//! Entity base contract shared by every persistable record.
//!
//! # Responsibility
//! - Declare the base attributes (`id`, `uuid`, `created`, `updated`).
//! - Describe each entity schema with a static field descriptor list.
//! - Provide generic `fields`/`get_values`/`set_values` driven by that list.
//!
//! # Invariants
//! - `id` is `None` until the first insert and positive afterwards.
//! - `uuid` is assigned once at construction and never reassigned.
//! - `updated >= created`; every `set_values` call strictly increases `updated`.
//! - `set_values` is the only mutation path for entity-specific fields.

use crate::model::factory::EntityFactory;
use crate::repo::crud::{CrudError, CrudResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Chain;
use std::slice::Iter;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Field-name to value representation used at API/transport boundaries.
pub type ValueMap = BTreeMap<String, FieldValue>;

/// Semantic kind of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Uuid,
    /// Unix epoch milliseconds.
    Timestamp,
}

/// Static schema entry for one entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Secret fields are stored but never handed to transport.
    pub secret: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            secret: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

/// Fields every entity carries, in column order.
pub const BASE_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("id", FieldKind::Integer).nullable(),
    FieldDescriptor::new("uuid", FieldKind::Uuid),
    FieldDescriptor::new("created", FieldKind::Timestamp),
    FieldDescriptor::new("updated", FieldKind::Timestamp),
];

/// A single field value.
///
/// Serialized untagged so a value mapping reads as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Base attributes owned by every entity instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    pub(crate) id: Option<i64>,
    uuid: Uuid,
    created: i64,
    updated: i64,
}

impl EntityMeta {
    /// Fresh metadata for an entity that has not been persisted yet.
    pub fn new() -> Self {
        let now = now_epoch_ms();
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            created: now,
            updated: now,
        }
    }

    /// Rebuilds metadata from persisted values.
    pub fn restore(values: &ValueMap) -> CrudResult<Self> {
        let id = required_integer(values, "id")?;
        let uuid_text = values
            .get("uuid")
            .and_then(FieldValue::as_text)
            .ok_or_else(|| CrudError::InvalidData("missing uuid column".to_string()))?;
        let uuid = Uuid::parse_str(uuid_text)
            .map_err(|_| CrudError::InvalidData(format!("invalid uuid value `{uuid_text}`")))?;
        let created = required_integer(values, "created")?;
        let updated = required_integer(values, "updated")?;
        if updated < created {
            return Err(CrudError::InvalidData(format!(
                "row {id} has updated {updated} earlier than created {created}"
            )));
        }

        Ok(Self {
            id: Some(id),
            uuid,
            created,
            updated,
        })
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn updated(&self) -> i64 {
        self.updated
    }

    /// Stamps `updated` with a value strictly greater than the previous one.
    pub fn touch(&mut self) {
        self.updated = now_epoch_ms().max(self.updated.saturating_add(1));
    }

    fn value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "uuid" => Some(FieldValue::Text(self.uuid.to_string())),
            "created" => Some(FieldValue::Integer(self.created)),
            "updated" => Some(FieldValue::Integer(self.updated)),
            _ => None,
        }
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor iterator over base fields followed by entity fields.
pub type FieldIter = Chain<Iter<'static, FieldDescriptor>, Iter<'static, FieldDescriptor>>;

/// Contract every persistable record type satisfies.
///
/// Implementors declare their own fields once in [`Entity::FIELDS`]; the
/// provided methods derive generic reflection from that list.
pub trait Entity: Sized + 'static {
    /// Human-readable type name used in errors and logs.
    const NAME: &'static str;
    /// Backing table.
    const TABLE: &'static str;
    /// Entity-specific fields, excluding [`BASE_FIELDS`].
    const FIELDS: &'static [FieldDescriptor];

    /// Factory bound to one session.
    type Factory<'s>: EntityFactory<Self>;

    /// Builds the factory for this type over `session`.
    fn factory<'s>(session: &'s crate::db::Session<'s>) -> Self::Factory<'s>;

    /// Builds an instance from its stored representation.
    ///
    /// `values` holds the own fields as they are persisted (already hashed,
    /// normalized, ...). Base fields in `values` are ignored.
    fn construct(meta: EntityMeta, values: &ValueMap) -> CrudResult<Self>;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Current value of one entity-specific field.
    fn own_value(&self, name: &str) -> Option<FieldValue>;

    /// Assigns one entity-specific field from caller input.
    fn assign(&mut self, name: &str, value: FieldValue) -> CrudResult<()>;

    /// All field descriptors, base fields first.
    fn descriptors() -> FieldIter {
        BASE_FIELDS.iter().chain(Self::FIELDS.iter())
    }

    /// Names of all declared fields.
    fn fields() -> Vec<&'static str> {
        Self::descriptors().map(|field| field.name).collect()
    }

    /// Looks up one declared field.
    fn field(name: &str) -> Option<&'static FieldDescriptor> {
        Self::descriptors().find(|field| field.name == name)
    }

    fn id(&self) -> Option<i64> {
        self.meta().id()
    }

    /// Values of all fields, or only of `subset` when given.
    ///
    /// Names in `subset` that are not declared are absent from the result.
    fn get_values(&self, subset: Option<&[&str]>) -> ValueMap {
        Self::descriptors()
            .filter(|field| subset.map_or(true, |names| names.contains(&field.name)))
            .map(|field| {
                let value = self
                    .meta()
                    .value(field.name)
                    .or_else(|| self.own_value(field.name))
                    .unwrap_or(FieldValue::Null);
                (field.name.to_string(), value)
            })
            .collect()
    }

    /// Like [`Entity::get_values`] but never includes secret fields.
    fn public_values(&self, subset: Option<&[&str]>) -> ValueMap {
        let mut values = self.get_values(subset);
        for field in Self::descriptors().filter(|field| field.secret) {
            values.remove(field.name);
        }
        values
    }

    /// Partial update: assigns own fields present in `values` with a
    /// non-null value and ignores everything else.
    ///
    /// Always stamps `updated`. Returns the number of assigned fields.
    fn set_values(&mut self, values: &ValueMap) -> CrudResult<usize> {
        let mut assigned = 0;
        for field in Self::FIELDS {
            match values.get(field.name) {
                Some(value) if !value.is_null() => {
                    check_kind(Self::NAME, field, value)?;
                    self.assign(field.name, value.clone())?;
                    assigned += 1;
                }
                _ => {}
            }
        }
        self.meta_mut().touch();
        Ok(assigned)
    }
}

/// Rejects keys that are not entity-specific fields of `E`.
///
/// Base fields count as unknown: they are assigned by the system.
pub fn reject_unknown_fields<E: Entity>(values: &ValueMap) -> CrudResult<()> {
    for key in values.keys() {
        if !E::FIELDS.iter().any(|field| field.name == key) {
            return Err(CrudError::InvalidArgument(format!(
                "{} got an unexpected field `{key}`",
                E::NAME
            )));
        }
    }
    Ok(())
}

/// Fetches a required text field from caller or stored input.
pub fn required_text<E: Entity>(values: &ValueMap, name: &str) -> CrudResult<String> {
    match values.get(name) {
        Some(FieldValue::Text(value)) => Ok(value.clone()),
        Some(FieldValue::Null) | None => Err(CrudError::InvalidArgument(format!(
            "{} is missing required field `{name}`",
            E::NAME
        ))),
        Some(_) => Err(CrudError::InvalidArgument(format!(
            "{}.{name} expects a text value",
            E::NAME
        ))),
    }
}

/// Checks that `value` matches the declared kind of `field`.
pub fn check_kind(entity: &str, field: &FieldDescriptor, value: &FieldValue) -> CrudResult<()> {
    let ok = match (field.kind, value) {
        (_, FieldValue::Null) => field.nullable,
        (FieldKind::Integer | FieldKind::Timestamp, FieldValue::Integer(_)) => true,
        (FieldKind::Text, FieldValue::Text(_)) => true,
        (FieldKind::Uuid, FieldValue::Text(text)) => Uuid::parse_str(text).is_ok(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CrudError::InvalidArgument(format!(
            "{entity}.{} expects a {:?} value",
            field.name, field.kind
        )))
    }
}

/// Current time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

fn required_integer(values: &ValueMap, name: &str) -> CrudResult<i64> {
    values
        .get(name)
        .and_then(FieldValue::as_integer)
        .ok_or_else(|| CrudError::InvalidData(format!("missing integer column `{name}`")))
}

#[cfg(test)]
mod tests {
    use super::{EntityMeta, FieldValue, ValueMap};

    #[test]
    fn new_meta_is_unpersisted_with_equal_timestamps() {
        let meta = EntityMeta::new();
        assert_eq!(meta.id(), None);
        assert_eq!(meta.created(), meta.updated());
    }

    #[test]
    fn touch_strictly_increases_updated() {
        let mut meta = EntityMeta::new();
        let mut previous = meta.updated();
        for _ in 0..5 {
            meta.touch();
            assert!(meta.updated() > previous);
            previous = meta.updated();
        }
        assert!(meta.created() < meta.updated());
    }

    #[test]
    fn touch_saturates_at_the_largest_timestamp() {
        let mut values = ValueMap::new();
        values.insert("id".into(), FieldValue::Integer(1));
        values.insert(
            "uuid".into(),
            FieldValue::Text("00000000-0000-4000-8000-000000000001".into()),
        );
        values.insert("created".into(), FieldValue::Integer(1));
        values.insert("updated".into(), FieldValue::Integer(i64::MAX));

        let mut meta = EntityMeta::restore(&values).unwrap();
        meta.touch();
        assert_eq!(meta.updated(), i64::MAX);
    }

    #[test]
    fn restore_rejects_updated_before_created() {
        let mut values = ValueMap::new();
        values.insert("id".into(), FieldValue::Integer(1));
        values.insert(
            "uuid".into(),
            FieldValue::Text("00000000-0000-4000-8000-000000000001".into()),
        );
        values.insert("created".into(), FieldValue::Integer(20));
        values.insert("updated".into(), FieldValue::Integer(10));

        assert!(EntityMeta::restore(&values).is_err());
    }

    #[test]
    fn field_values_serialize_as_plain_json() {
        let mut values = ValueMap::new();
        values.insert("id".into(), FieldValue::Integer(3));
        values.insert("name".into(), FieldValue::from("alice"));
        values.insert("note".into(), FieldValue::Null);

        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"id":3,"name":"alice","note":null}"#);
    }
}
