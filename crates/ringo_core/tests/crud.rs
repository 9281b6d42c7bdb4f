use ringo_core::db::open_db_in_memory;
use ringo_core::model::entity::required_text;
use ringo_core::repo::crud;
use ringo_core::{
    session_scope, CrudError, DefaultFactory, Entity, EntityMeta, FieldDescriptor, FieldKind,
    FieldValue, ScopeExit, SearchQuery, Session, User, ValueMap,
};
use rusqlite::Connection;

/// Minimal second entity exercising the default factory.
#[derive(Debug)]
struct Label {
    meta: EntityMeta,
    title: String,
    weight: Option<i64>,
}

const LABEL_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("title", FieldKind::Text),
    FieldDescriptor::new("weight", FieldKind::Integer).nullable(),
];

impl Entity for Label {
    const NAME: &'static str = "Label";
    const TABLE: &'static str = "labels";
    const FIELDS: &'static [FieldDescriptor] = LABEL_FIELDS;

    type Factory<'s> = DefaultFactory<'s, Label>;

    fn factory<'s>(session: &'s Session<'s>) -> Self::Factory<'s> {
        DefaultFactory::new(session)
    }

    fn construct(meta: EntityMeta, values: &ValueMap) -> ringo_core::CrudResult<Self> {
        Ok(Self {
            meta,
            title: required_text::<Self>(values, "title")?,
            weight: values.get("weight").and_then(FieldValue::as_integer),
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
            "title" => Some(FieldValue::from(self.title.as_str())),
            "weight" => Some(self.weight.into()),
            _ => None,
        }
    }

    fn assign(&mut self, name: &str, value: FieldValue) -> ringo_core::CrudResult<()> {
        match (name, value) {
            ("title", FieldValue::Text(title)) => self.title = title,
            ("weight", FieldValue::Integer(weight)) => self.weight = Some(weight),
            (other, _) => {
                return Err(CrudError::InvalidArgument(format!(
                    "Label cannot assign `{other}`"
                )))
            }
        }
        Ok(())
    }
}

fn open_store() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE labels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            title TEXT NOT NULL,
            weight INTEGER
        );",
    )
    .unwrap();
    conn
}

fn values(pairs: &[(&str, &str)]) -> ValueMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), FieldValue::from(*value)))
        .collect()
}

fn user_values(name: &str) -> ValueMap {
    values(&[("name", name), ("password", "test")])
}

#[test]
fn create_assigns_id_and_read_returns_same_fields() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let created: User = crud::create(&session, user_values("Foo")).unwrap();
    let id = created.id().expect("flush should assign an id");
    assert!(id > 0);

    let loaded: User = crud::read(&session, id).unwrap();
    assert_eq!(loaded.name(), "Foo");
    assert_eq!(loaded.meta().uuid(), created.meta().uuid());
    assert_eq!(loaded.get_values(None), created.get_values(None));
}

#[test]
fn create_rejects_unexpected_field() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let err = crud::create::<User>(&session, values(&[("foo", "bar")])).unwrap_err();
    assert!(matches!(err, CrudError::InvalidArgument(ref msg) if msg.contains("foo")));
    assert_eq!(session.count::<User>().unwrap(), 0);
}

#[test]
fn non_positive_ids_are_invalid_arguments() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    assert!(matches!(
        crud::read::<User>(&session, 0),
        Err(CrudError::InvalidArgument(_))
    ));
    assert!(matches!(
        crud::update::<User>(&session, -3, &ValueMap::new()),
        Err(CrudError::InvalidArgument(_))
    ));
    assert!(matches!(
        crud::delete::<User>(&session, 0),
        Err(CrudError::InvalidArgument(_))
    ));
}

#[test]
fn read_missing_row_is_not_found() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let err = crud::read::<User>(&session, 9999).unwrap_err();
    assert!(matches!(
        err,
        CrudError::NotFound {
            entity: "User",
            id: 9999
        }
    ));
}

#[test]
fn update_changes_only_supplied_fields_and_updated() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();
    let created: User = crud::create(&session, user_values("Foo")).unwrap();
    let id = created.id().unwrap();

    let updated: User = crud::update(&session, id, &values(&[("name", "Foo2")])).unwrap();
    assert_eq!(updated.name(), "Foo2");
    assert_eq!(updated.password_hash(), created.password_hash());
    assert_eq!(updated.meta().created(), created.meta().created());
    assert_eq!(updated.meta().uuid(), created.meta().uuid());
    assert!(updated.meta().updated() > created.meta().updated());

    let reloaded: User = crud::read(&session, id).unwrap();
    assert_eq!(reloaded.get_values(None), updated.get_values(None));
}

#[test]
fn updated_strictly_increases_even_for_equal_values() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();
    let created: User = crud::create(&session, user_values("same")).unwrap();
    let id = created.id().unwrap();

    let mut previous = created.meta().updated();
    for _ in 0..3 {
        let user: User = crud::update(&session, id, &values(&[("name", "same")])).unwrap();
        assert!(user.meta().updated() > previous);
        assert_eq!(user.meta().created(), created.meta().created());
        previous = user.meta().updated();
    }
}

#[test]
fn delete_removes_row_and_later_read_is_not_found() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();
    let created: User = crud::create(&session, user_values("gone")).unwrap();
    let id = created.id().unwrap();
    let before = session.count::<User>().unwrap();

    crud::delete::<User>(&session, id).unwrap();

    assert_eq!(session.count::<User>().unwrap(), before - 1);
    assert!(matches!(
        crud::read::<User>(&session, id),
        Err(CrudError::NotFound { .. })
    ));
    assert!(matches!(
        crud::delete::<User>(&session, id),
        Err(CrudError::NotFound { .. })
    ));
}

#[test]
fn search_applies_conjunctive_filter() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();
    let first: User = crud::create(&session, user_values("test")).unwrap();
    crud::create::<User>(&session, user_values("other")).unwrap();

    let query = SearchQuery {
        filter: Some(format!("id::{}|name::test", first.id().unwrap())),
        ..SearchQuery::default()
    };
    let found: Vec<User> = crud::search(&session, &query).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name(), "test");

    let none = SearchQuery {
        filter: Some(format!("id::{}|name::other", first.id().unwrap())),
        ..SearchQuery::default()
    };
    assert!(crud::search::<User>(&session, &none).unwrap().is_empty());
}

#[test]
fn search_rejects_bad_filters_with_client_error() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    for filter in ["id:1", "xxx::1"] {
        let query = SearchQuery {
            filter: Some(filter.to_string()),
            ..SearchQuery::default()
        };
        assert!(matches!(
            crud::search::<User>(&session, &query),
            Err(CrudError::ClientError(_))
        ));
    }
}

#[test]
fn search_pages_and_sorts() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();
    for name in ["c", "a", "b", "d"] {
        crud::create::<User>(&session, user_values(name)).unwrap();
    }

    let page = SearchQuery {
        limit: Some(2),
        offset: 1,
        ..SearchQuery::default()
    };
    let names: Vec<String> = crud::search::<User>(&session, &page)
        .unwrap()
        .iter()
        .map(|user| user.name().to_string())
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    let offset_only = SearchQuery {
        offset: 3,
        ..SearchQuery::default()
    };
    assert_eq!(crud::search::<User>(&session, &offset_only).unwrap().len(), 1);

    let sorted = SearchQuery {
        sort: Some("name::desc".to_string()),
        ..SearchQuery::default()
    };
    let names: Vec<String> = crud::search::<User>(&session, &sorted)
        .unwrap()
        .iter()
        .map(|user| user.name().to_string())
        .collect();
    assert_eq!(names, vec!["d", "c", "b", "a"]);
}

#[test]
fn duplicate_name_fails_and_scope_rolls_back() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let first: Result<i64, CrudError> = session_scope(&session, ScopeExit::KeepOpen, |s| {
        let user: User = crud::create(s, user_values("dup"))?;
        Ok(user.id().unwrap())
    });
    let first_id = first.unwrap();

    let second: Result<i64, CrudError> = session_scope(&session, ScopeExit::KeepOpen, |s| {
        crud::create::<User>(s, user_values("unrelated"))?;
        let user: User = crud::create(s, user_values("dup"))?;
        Ok(user.id().unwrap())
    });
    assert!(matches!(second, Err(CrudError::ConstraintViolation(_))));

    assert_eq!(session.count::<User>().unwrap(), 1);
    let kept: User = crud::read(&session, first_id).unwrap();
    assert_eq!(kept.name(), "dup");
}

#[test]
fn closed_session_rejects_crud_calls() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let id: Result<i64, CrudError> = session_scope(&session, ScopeExit::Close, |s| {
        let user: User = crud::create(s, user_values("scoped"))?;
        Ok(user.id().unwrap())
    });
    let id = id.unwrap();

    assert!(matches!(
        crud::read::<User>(&session, id),
        Err(CrudError::SessionClosed)
    ));

    let fresh = Session::try_new(&conn).unwrap();
    let user: User = crud::read(&fresh, id).unwrap();
    assert_eq!(user.name(), "scoped");
}

#[test]
fn default_factory_entity_supports_partial_updates() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let mut create_values = values(&[("title", "urgent")]);
    create_values.insert("weight".to_string(), FieldValue::Integer(3));
    let label: Label = crud::create(&session, create_values).unwrap();
    let id = label.id().unwrap();

    let mut update_values = values(&[("title", "later")]);
    update_values.insert("weight".to_string(), FieldValue::Null);
    let updated: Label = crud::update(&session, id, &update_values).unwrap();
    assert_eq!(updated.title, "later");
    assert_eq!(updated.weight, Some(3));

    let wrong_kind = values(&[("weight", "heavy")]);
    assert!(matches!(
        crud::update::<Label>(&session, id, &wrong_kind),
        Err(CrudError::InvalidArgument(_))
    ));

    assert!(matches!(
        crud::create::<Label>(&session, values(&[("id", "1"), ("title", "x")])),
        Err(CrudError::InvalidArgument(_))
    ));
}

#[test]
fn default_factory_rejects_wrong_kind_on_create() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();

    let err = crud::create::<Label>(&session, values(&[("title", "t"), ("weight", "heavy")]))
        .unwrap_err();
    assert!(matches!(err, CrudError::InvalidArgument(ref msg) if msg.contains("weight")));
    assert_eq!(session.count::<Label>().unwrap(), 0);

    let mut untitled = ValueMap::new();
    untitled.insert("title".to_string(), FieldValue::Integer(7));
    assert!(matches!(
        crud::create::<Label>(&session, untitled),
        Err(CrudError::InvalidArgument(_))
    ));
}

#[test]
fn search_refuses_secret_fields() {
    let conn = open_store();
    let session = Session::try_new(&conn).unwrap();
    crud::create::<User>(&session, user_values("hidden")).unwrap();

    for query in [
        SearchQuery {
            sort: Some("password".to_string()),
            ..SearchQuery::default()
        },
        SearchQuery {
            filter: Some("password::test".to_string()),
            ..SearchQuery::default()
        },
    ] {
        assert!(matches!(
            crud::search::<User>(&session, &query),
            Err(CrudError::ClientError(_))
        ));
    }
}
