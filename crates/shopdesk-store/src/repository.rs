//! Generic CRUD over any [`Entity`].
//!
//! Reads and writes go through the entity's descriptor, so every table gets
//! the same filtering, pagination, soft delete and clone behaviour. Input
//! objects are accepted in camelCase or snake_case; keys that are not
//! writable columns are dropped.

use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shopdesk_core::case::snake_case_keys;
use shopdesk_core::ids::EntityId;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::entity::{
    quote_ident, Entity, EntityDescriptor, EntityRegistry, CREATED_AT_COLUMN, DELETED_AT_COLUMN,
    ID_COLUMN, IS_ACTIVE_COLUMN, UPDATED_AT_COLUMN,
};
use crate::error::StoreError;
use crate::query::filter::ColumnRef;
use crate::query::{FilterCompiler, FilterParams, Pagination, Predicate, Query, Visibility};
use crate::row_helpers::{json_to_sql, now_timestamp, Record};

/// One page of results together with the total match count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub total: i64,
    pub results: Vec<T>,
}

pub struct Repository<T: Entity> {
    db: Database,
    registry: Arc<EntityRegistry>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            registry: self.registry.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(db: Database, registry: Arc<EntityRegistry>) -> Self {
        Self {
            db,
            registry,
            _entity: PhantomData,
        }
    }

    fn descriptor(&self) -> &'static EntityDescriptor {
        T::descriptor()
    }

    fn by_id(&self, id: &EntityId, visibility: Visibility) -> Query {
        let desc = self.descriptor();
        Query::new(desc, visibility).filter(Predicate::eq(
            ColumnRef::new(desc.table, ID_COLUMN),
            SqlValue::Text(id.as_str().to_string()),
        ))
    }

    fn compile_filter(&self, filter: &Value) -> Result<Predicate, StoreError> {
        Ok(FilterCompiler::new(&self.registry, self.descriptor()).compile(filter)?)
    }

    fn not_found(&self) -> StoreError {
        StoreError::NotFound(self.descriptor().name.to_string())
    }

    fn load(&self, conn: &Connection, query: &Query) -> Result<Option<T>, StoreError> {
        query
            .fetch_first(conn, &self.registry)?
            .map(into_entity)
            .transpose()
    }

    fn load_many(&self, conn: &Connection, query: &Query) -> Result<Vec<T>, StoreError> {
        query
            .fetch(conn, &self.registry)?
            .into_iter()
            .map(into_entity)
            .collect()
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Fetch by id; soft-deleted rows are invisible.
    #[instrument(skip(self), fields(table = T::descriptor().table))]
    pub fn get(&self, id: &EntityId) -> Result<Option<T>, StoreError> {
        let query = self.by_id(id, Visibility::Active);
        self.db.with_conn(|conn| self.load(conn, &query))
    }

    pub fn get_or_fail(&self, id: &EntityId) -> Result<T, StoreError> {
        self.get(id)?.ok_or_else(|| self.not_found())
    }

    /// Fetch by id regardless of soft-delete state.
    #[instrument(skip(self), fields(table = T::descriptor().table))]
    pub fn get_including_inactive(&self, id: &EntityId) -> Result<Option<T>, StoreError> {
        let query = self.by_id(id, Visibility::IncludingInactive);
        self.db.with_conn(|conn| self.load(conn, &query))
    }

    #[instrument(skip(self, params), fields(table = T::descriptor().table))]
    pub fn get_multi(&self, params: &FilterParams) -> Result<Vec<T>, StoreError> {
        let query = Query::build(&self.registry, self.descriptor(), params, Visibility::Active)?;
        self.db.with_conn(|conn| self.load_many(conn, &query))
    }

    #[instrument(skip(self, params), fields(table = T::descriptor().table))]
    pub fn get_multi_including_inactive(&self, params: &FilterParams) -> Result<Vec<T>, StoreError> {
        let query = Query::build(
            &self.registry,
            self.descriptor(),
            params,
            Visibility::IncludingInactive,
        )?;
        self.db.with_conn(|conn| self.load_many(conn, &query))
    }

    /// One page plus the number of rows matching the same joins and filter.
    #[instrument(skip(self, params), fields(table = T::descriptor().table))]
    pub fn get_multi_with_count(&self, params: &FilterParams) -> Result<Paged<T>, StoreError> {
        let query = Query::build(&self.registry, self.descriptor(), params, Visibility::Active)?;
        self.db.with_conn(|conn| {
            let total = query.count(conn)?;
            let results = self.load_many(conn, &query)?;
            Ok(Paged { total, results })
        })
    }

    /// Every non-deleted row, unpaginated.
    pub fn get_all_with_count(&self) -> Result<Paged<T>, StoreError> {
        self.get_multi_with_count(&FilterParams::new())
    }

    /// First non-deleted row matching a snake_case filter expression.
    #[instrument(skip(self), fields(table = T::descriptor().table))]
    pub fn get_one_by(&self, filter: &Value) -> Result<Option<T>, StoreError> {
        let query = Query::new(self.descriptor(), Visibility::Active).filter(self.compile_filter(filter)?);
        self.db.with_conn(|conn| self.load(conn, &query))
    }

    pub fn get_one_by_or_fail(&self, filter: &Value) -> Result<T, StoreError> {
        self.get_one_by(filter)?.ok_or_else(|| self.not_found())
    }

    #[instrument(skip(self), fields(table = T::descriptor().table))]
    pub fn get_one_by_including_inactive(&self, filter: &Value) -> Result<Option<T>, StoreError> {
        let query = Query::new(self.descriptor(), Visibility::IncludingInactive)
            .filter(self.compile_filter(filter)?);
        self.db.with_conn(|conn| self.load(conn, &query))
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Insert a new row from `input`. The id and timestamps are generated;
    /// unique-constraint violations surface as [`StoreError::DuplicateKey`].
    #[instrument(skip(self, input), fields(table = T::descriptor().table))]
    pub fn create(&self, input: &impl Serialize) -> Result<T, StoreError> {
        let data = input_object(input)?;
        let desc = self.descriptor();
        let id = EntityId::new();
        let now = now_timestamp();

        let mut row: Vec<(&'static str, SqlValue)> = vec![
            (ID_COLUMN, SqlValue::Text(id.as_str().to_string())),
            (CREATED_AT_COLUMN, SqlValue::Text(now.clone())),
            (UPDATED_AT_COLUMN, SqlValue::Text(now)),
        ];
        for column in desc.writable_columns() {
            if let Some(value) = data.get(column.name) {
                row.push((column.name, json_to_sql(value, column, desc.table)?));
            }
        }

        self.db.with_conn(|conn| {
            insert_row(conn, desc, row)?;
            debug!(id = %id, "created");
            self.load(conn, &self.by_id(&id, Visibility::IncludingInactive))?
                .ok_or_else(|| self.not_found())
        })
    }

    /// Overwrite `entity` with every field `input` serializes. Callers pass
    /// a typed update body, so fields it declares but the client omitted are
    /// written with their defaults.
    #[instrument(skip(self, entity, input), fields(table = T::descriptor().table, id = %entity.id()))]
    pub fn update(&self, entity: &T, input: &impl Serialize) -> Result<T, StoreError> {
        let data = input_object(input)?;
        self.apply_changes(entity.id(), &data)
    }

    /// Change only the fields present in `changes`.
    #[instrument(skip(self, entity, changes), fields(table = T::descriptor().table, id = %entity.id()))]
    pub fn patch(&self, entity: &T, changes: &Map<String, Value>) -> Result<T, StoreError> {
        let data = snake_case_keys(changes);
        self.apply_changes(entity.id(), &data)
    }

    /// Update the first non-deleted row matching `filter`; `None` when
    /// nothing matches.
    pub fn update_one_by(
        &self,
        filter: &Value,
        input: &impl Serialize,
    ) -> Result<Option<T>, StoreError> {
        match self.get_one_by(filter)? {
            Some(entity) => self.update(&entity, input).map(Some),
            None => Ok(None),
        }
    }

    fn apply_changes(&self, id: &EntityId, data: &Map<String, Value>) -> Result<T, StoreError> {
        let desc = self.descriptor();
        let mut sets: Vec<(&'static str, SqlValue)> = Vec::new();
        for column in desc.writable_columns() {
            if let Some(value) = data.get(column.name) {
                sets.push((column.name, json_to_sql(value, column, desc.table)?));
            }
        }
        sets.push((UPDATED_AT_COLUMN, SqlValue::Text(now_timestamp())));

        self.db.with_conn(|conn| {
            let changed = update_row(conn, desc, id, sets)?;
            if changed == 0 {
                return Err(self.not_found());
            }
            self.load(conn, &self.by_id(id, Visibility::IncludingInactive))?
                .ok_or_else(|| self.not_found())
        })
    }

    /// Soft delete: mark inactive and stamp `deleted_at`. The row stays
    /// reachable through the `*_including_inactive` reads.
    #[instrument(skip(self), fields(table = T::descriptor().table))]
    pub fn remove(&self, id: &EntityId) -> Result<T, StoreError> {
        let desc = self.descriptor();
        let now = now_timestamp();
        let sets = vec![
            (IS_ACTIVE_COLUMN, SqlValue::Integer(0)),
            (DELETED_AT_COLUMN, SqlValue::Text(now.clone())),
            (UPDATED_AT_COLUMN, SqlValue::Text(now)),
        ];
        self.db.with_conn(|conn| {
            if update_row(conn, desc, id, sets)? == 0 {
                return Err(self.not_found());
            }
            self.load(conn, &self.by_id(id, Visibility::IncludingInactive))?
                .ok_or_else(|| self.not_found())
        })
    }

    /// Hard delete. Returns the row as it was before deletion.
    #[instrument(skip(self), fields(table = T::descriptor().table))]
    pub fn delete(&self, id: &EntityId) -> Result<T, StoreError> {
        let desc = self.descriptor();
        self.db.with_conn(|conn| {
            let existing = self
                .load(conn, &self.by_id(id, Visibility::IncludingInactive))?
                .ok_or_else(|| self.not_found())?;
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1",
                    quote_ident(desc.table),
                    quote_ident(ID_COLUMN)
                ),
                [id.as_str()],
            )
            .map_err(StoreError::from_write)?;
            Ok(existing)
        })
    }

    /// Insert a copy of `entity` under a fresh id. Every other column is
    /// copied from the stored row, then `overrides` are applied.
    #[instrument(skip(self, entity, overrides), fields(table = T::descriptor().table, source = %entity.id()))]
    pub fn clone_entity(&self, entity: &T, overrides: &Map<String, Value>) -> Result<T, StoreError> {
        let desc = self.descriptor();
        let overrides = snake_case_keys(overrides);
        let source_query = self.by_id(entity.id(), Visibility::IncludingInactive);
        let id = EntityId::new();

        self.db.with_conn(|conn| {
            let source: Record = source_query
                .fetch_first(conn, &self.registry)?
                .ok_or_else(|| self.not_found())?;

            let mut row: Vec<(&'static str, SqlValue)> =
                vec![(ID_COLUMN, SqlValue::Text(id.as_str().to_string()))];
            for column in desc.columns.iter().filter(|c| c.name != ID_COLUMN) {
                let value = overrides
                    .get(column.name)
                    .filter(|_| desc.writable_columns().any(|w| w.name == column.name))
                    .or_else(|| source.get(column.name))
                    .unwrap_or(&Value::Null);
                row.push((column.name, json_to_sql(value, column, desc.table)?));
            }

            insert_row(conn, desc, row)?;
            debug!(id = %id, "cloned");
            self.load(conn, &self.by_id(&id, Visibility::IncludingInactive))?
                .ok_or_else(|| self.not_found())
        })
    }

    /// Rows in the table, soft-deleted ones included.
    pub fn count_all(&self) -> Result<i64, StoreError> {
        let query = Query::new(self.descriptor(), Visibility::IncludingInactive);
        self.db.with_conn(|conn| query.count(conn))
    }

    pub fn paginate(&self, page: i64, limit: i64) -> Result<Vec<T>, StoreError> {
        self.get_multi(&FilterParams {
            pagination: Some(Pagination::new(page, limit)),
            ..FilterParams::default()
        })
    }
}

fn into_entity<T: Entity>(record: Record) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Serialize an input body to a snake_case JSON object.
fn input_object(input: &impl Serialize) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(input)? {
        Value::Object(map) => Ok(snake_case_keys(&map)),
        other => Err(StoreError::InvalidInput(format!(
            "input must be an object, got {other}"
        ))),
    }
}

fn insert_row(
    conn: &Connection,
    desc: &EntityDescriptor,
    row: Vec<(&'static str, SqlValue)>,
) -> Result<(), StoreError> {
    let columns: Vec<String> = row.iter().map(|(name, _)| quote_ident(name)).collect();
    let marks = vec!["?"; row.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({marks})",
        quote_ident(desc.table),
        columns.join(", ")
    );
    conn.execute(&sql, params_from_iter(row.into_iter().map(|(_, v)| v)))
        .map_err(StoreError::from_write)?;
    Ok(())
}

fn update_row(
    conn: &Connection,
    desc: &EntityDescriptor,
    id: &EntityId,
    sets: Vec<(&'static str, SqlValue)>,
) -> Result<usize, StoreError> {
    let assignments: Vec<String> = sets
        .iter()
        .map(|(name, _)| format!("{} = ?", quote_ident(name)))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(desc.table),
        assignments.join(", "),
        quote_ident(ID_COLUMN)
    );
    let params = sets
        .into_iter()
        .map(|(_, v)| v)
        .chain(std::iter::once(SqlValue::Text(id.as_str().to_string())));
    conn.execute(&sql, params_from_iter(params))
        .map_err(StoreError::from_write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{Item, ItemCreate, ItemUpdate};
    use crate::users::{User, UserCreate};
    use serde_json::json;

    struct Fixture {
        items: Repository<Item>,
        users: Repository<User>,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let registry = Arc::new(EntityRegistry::standard());
        Fixture {
            items: Repository::new(db.clone(), registry.clone()),
            users: Repository::new(db, registry),
        }
    }

    fn item(name: &str, quantity: i64) -> ItemCreate {
        ItemCreate {
            full_name: name.into(),
            description: None,
            quantity: Some(quantity),
            owner_id: None,
        }
    }

    fn user(email: &str) -> UserCreate {
        UserCreate {
            email: email.into(),
            password_hash: "x".into(),
            role: Default::default(),
            display_name: None,
            phone_number: None,
            is_verified: false,
        }
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn create_generates_id_and_timestamps() {
        let f = fixture();
        let created = f.items.create(&item("Lamp", 2)).unwrap();
        assert_eq!(created.full_name, "Lamp");
        assert_eq!(created.quantity, 2);
        assert!(created.is_active);
        assert!(created.deleted_at.is_none());
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(f.items.get(&created.id).unwrap(), Some(created));
    }

    #[test]
    fn create_accepts_camel_case_and_drops_unknown_keys() {
        let f = fixture();
        let created = f
            .items
            .create(&json!({"fullName": "Desk", "quantity": 1, "colour": "red", "id": "mine"}))
            .unwrap();
        assert_eq!(created.full_name, "Desk");
        assert_ne!(created.id.as_str(), "mine");
    }

    #[test]
    fn create_applies_column_defaults() {
        let f = fixture();
        let created = f.items.create(&json!({"full_name": "Chair"})).unwrap();
        assert_eq!(created.quantity, 0);
        let u = f.users.create(&user("a@b.c")).unwrap();
        assert_eq!(u.display_name, "user");
        assert!(u.avatar_url.starts_with("https://"));
    }

    #[test]
    fn duplicate_unique_field_rejected_and_store_unchanged() {
        let f = fixture();
        f.users.create(&user("dup@x.io")).unwrap();
        let err = f.users.create(&user("dup@x.io")).unwrap_err();
        match err {
            StoreError::DuplicateKey(msg) => assert!(msg.contains("users.email"), "{msg}"),
            other => panic!("expected DuplicateKey, got {other:?}"),
        }
        assert_eq!(f.users.count_all().unwrap(), 1);
    }

    #[test]
    fn get_unknown_id_is_none_and_or_fail_is_not_found() {
        let f = fixture();
        let id = EntityId::new();
        assert!(f.items.get(&id).unwrap().is_none());
        let err = f.items.get_or_fail(&id).unwrap_err();
        assert_eq!(err.to_string(), "Item not found");
    }

    #[test]
    fn soft_delete_hides_from_reads_but_not_direct_lookup() {
        let f = fixture();
        let a = f.items.create(&item("A", 1)).unwrap();
        f.items.create(&item("B", 1)).unwrap();

        let removed = f.items.remove(&a.id).unwrap();
        assert!(!removed.is_active);
        assert!(removed.deleted_at.is_some());

        assert!(f.items.get(&a.id).unwrap().is_none());
        let listed = f.items.get_multi(&FilterParams::new()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].full_name, "B");
        assert_eq!(f.items.get_all_with_count().unwrap().total, 1);

        assert!(f.items.get_including_inactive(&a.id).unwrap().is_some());
        assert_eq!(
            f.items
                .get_multi_including_inactive(&FilterParams::new())
                .unwrap()
                .len(),
            2
        );
        assert!(f
            .items
            .get_one_by_including_inactive(&json!({"full_name": "A"}))
            .unwrap()
            .is_some());
        assert!(f.items.get_one_by(&json!({"full_name": "A"})).unwrap().is_none());
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.items.remove(&EntityId::new()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn hard_delete_removes_row() {
        let f = fixture();
        let a = f.items.create(&item("A", 1)).unwrap();
        let deleted = f.items.delete(&a.id).unwrap();
        assert_eq!(deleted.id, a.id);
        assert!(f.items.get_including_inactive(&a.id).unwrap().is_none());
        assert!(matches!(f.items.delete(&a.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn hard_delete_of_referenced_user_is_conflict() {
        let f = fixture();
        let owner = f.users.create(&user("o@x.io")).unwrap();
        f.items
            .create(&json!({"fullName": "Owned", "ownerId": owner.id}))
            .unwrap();
        assert!(matches!(f.users.delete(&owner.id), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn count_matches_filter_regardless_of_page() {
        let f = fixture();
        for n in 0..7 {
            f.items.create(&item(&format!("thing-{n}"), n)).unwrap();
        }
        let params = FilterParams::new()
            .with_filter(json!({"quantity__gte": 2}))
            .with_order_by("quantity")
            .with_pagination(2, 2);
        let page = f.items.get_multi_with_count(&params).unwrap();
        assert_eq!(page.total, 5);
        let quantities: Vec<i64> = page.results.iter().map(|i| i.quantity).collect();
        assert_eq!(quantities, vec![4, 5]);
    }

    #[test]
    fn page_zero_reads_from_start() {
        let f = fixture();
        for n in 0..3 {
            f.items.create(&item("x", n)).unwrap();
        }
        let params = FilterParams::new().with_order_by("quantity").with_pagination(0, 2);
        let got = f.items.get_multi(&params).unwrap();
        assert_eq!(got.iter().map(|i| i.quantity).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(f.items.paginate(2, 2).unwrap().len(), 1);
    }

    #[test]
    fn descending_order() {
        let f = fixture();
        for n in [3, 1, 2] {
            f.items.create(&item("x", n)).unwrap();
        }
        let got = f
            .items
            .get_multi(&FilterParams::new().with_order_by("-quantity"))
            .unwrap();
        assert_eq!(got.iter().map(|i| i.quantity).collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn or_and_nesting_against_rows() {
        let f = fixture();
        f.items.create(&item("Red Lamp", 1)).unwrap();
        f.items.create(&item("Blue Lamp", 20)).unwrap();
        f.items.create(&item("Green Desk", 20)).unwrap();

        let filter = json!({
            "0": [{"quantity__lt": 5}, {"quantity__gt": 10}],
            "full_name__ilike": "LAMP"
        });
        let got = f.items.get_multi(&FilterParams::new().with_filter(filter)).unwrap();
        let mut names: Vec<_> = got.into_iter().map(|i| i.full_name).collect();
        names.sort();
        assert_eq!(names, vec!["Blue Lamp", "Red Lamp"]);

        assert!(f
            .items
            .get_multi(&FilterParams::new().with_filter(json!([])))
            .unwrap()
            .is_empty());
        assert_eq!(
            f.items
                .get_multi(&FilterParams::new().with_filter(json!({})))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn like_is_case_sensitive_ilike_is_not() {
        let f = fixture();
        f.items.create(&item("Lamp", 1)).unwrap();
        let like = |pattern: &str| {
            f.items
                .get_multi(&FilterParams::new().with_filter(json!({"full_name__like": pattern})))
                .unwrap()
                .len()
        };
        assert_eq!(like("amp"), 1);
        assert_eq!(like("LAMP"), 0);
        let ilike = f
            .items
            .get_multi(&FilterParams::new().with_filter(json!({"full_name__ilike": "LAMP"})))
            .unwrap();
        assert_eq!(ilike.len(), 1);
    }

    #[test]
    fn in_nin_between_isnull() {
        let f = fixture();
        for n in 1..=5 {
            f.items.create(&item("x", n)).unwrap();
        }
        f.items
            .create(&json!({"fullName": "described", "quantity": 9, "description": "d"}))
            .unwrap();
        let count = |filter: Value| {
            f.items
                .get_multi(&FilterParams::new().with_filter(filter))
                .unwrap()
                .len()
        };
        assert_eq!(count(json!({"quantity__in": [1, 3]})), 2);
        assert_eq!(count(json!({"quantity__in": []})), 0);
        assert_eq!(count(json!({"quantity__nin": [1, 3]})), 4);
        assert_eq!(count(json!({"quantity__nin": []})), 6);
        assert_eq!(count(json!({"quantity__between": [2, 4]})), 3);
        assert_eq!(count(json!({"description__isnull": false})), 1);
        assert_eq!(count(json!({"description__isnull": true})), 5);
        assert_eq!(count(json!({"description": null})), 5);
        assert_eq!(count(json!({"is_active": true})), 6);
    }

    #[test]
    fn malformed_filter_is_error() {
        let f = fixture();
        let err = f
            .items
            .get_multi(&FilterParams::new().with_filter(json!({"quantity__approx": 1})))
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedFilter(_)));
    }

    #[test]
    fn join_filters_on_related_column() {
        let f = fixture();
        let alice = f.users.create(&user("alice@x.io")).unwrap();
        let bob = f.users.create(&user("bob@x.io")).unwrap();
        f.items.create(&json!({"fullName": "A1", "ownerId": alice.id})).unwrap();
        f.items.create(&json!({"fullName": "A2", "ownerId": alice.id})).unwrap();
        f.items.create(&json!({"fullName": "B1", "ownerId": bob.id})).unwrap();
        f.items.create(&json!({"fullName": "orphan"})).unwrap();

        let params = FilterParams::new()
            .with_join(json!({"owner": {}}))
            .with_filter(json!({"owner.email": "alice@x.io"}));
        let page = f.items.get_multi_with_count(&params).unwrap();
        assert_eq!(page.total, 2);
        assert!(page.results.iter().all(|i| i.owner_id.as_ref() == Some(&alice.id)));
    }

    #[test]
    fn one_to_many_join_returns_each_root_once() {
        let f = fixture();
        let alice = f.users.create(&user("alice@x.io")).unwrap();
        let bob = f.users.create(&user("bob@x.io")).unwrap();
        f.users.create(&user("carol@x.io")).unwrap();
        for (name, qty) in [("A1", 1), ("A2", 5), ("A3", 7)] {
            f.items
                .create(&json!({"fullName": name, "quantity": qty, "ownerId": alice.id}))
                .unwrap();
        }
        f.items.create(&json!({"fullName": "B1", "quantity": 3, "ownerId": bob.id})).unwrap();

        let params = FilterParams::new()
            .with_join(json!({"items": {}}))
            .with_filter(json!({"items.quantity__gte": 0}))
            .with_order_by("email");
        let page = f.users.get_multi_with_count(&params).unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.results.iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec![alice.id.clone(), bob.id.clone()]);

        let second = f
            .users
            .get_multi(&params.clone().with_pagination(2, 1))
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, bob.id);
    }

    #[test]
    fn include_attaches_related_rows() {
        let f = fixture();
        let alice = f.users.create(&user("alice@x.io")).unwrap();
        f.items.create(&json!({"fullName": "A1", "ownerId": alice.id})).unwrap();
        f.items.create(&json!({"fullName": "A2", "ownerId": alice.id})).unwrap();
        f.items.create(&json!({"fullName": "orphan"})).unwrap();

        let items = f
            .items
            .get_multi(&FilterParams::new().with_include("owner").with_order_by("full_name"))
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].owner.as_ref().map(|u| &u.id), Some(&alice.id));
        assert!(items[2].owner.is_none());

        let users = f
            .users
            .get_multi(&FilterParams::new().with_include("items"))
            .unwrap();
        assert_eq!(users[0].items.as_ref().map(Vec::len), Some(2));

        let plain = f.items.get_multi(&FilterParams::new()).unwrap();
        assert!(plain.iter().all(|i| i.owner.is_none()));
    }

    #[test]
    fn update_overwrites_declared_fields() {
        let f = fixture();
        let a = f
            .items
            .create(&json!({"fullName": "Lamp", "description": "old", "quantity": 4}))
            .unwrap();
        let body: ItemUpdate = serde_json::from_value(json!({"fullName": "Lamp 2"})).unwrap();
        let updated = f.items.update(&a, &body).unwrap();
        assert_eq!(updated.full_name, "Lamp 2");
        assert_eq!(updated.description, None);
        assert_eq!(updated.quantity, 0);
        assert_eq!(updated.created_at, a.created_at);
        assert!(updated.updated_at >= a.updated_at);
    }

    #[test]
    fn patch_changes_only_present_fields() {
        let f = fixture();
        let a = f
            .items
            .create(&json!({"fullName": "Lamp", "description": "keep", "quantity": 4}))
            .unwrap();
        let patched = f.items.patch(&a, &obj(json!({"quantity": 9}))).unwrap();
        assert_eq!(patched.quantity, 9);
        assert_eq!(patched.full_name, "Lamp");
        assert_eq!(patched.description.as_deref(), Some("keep"));
    }

    #[test]
    fn patch_with_wrong_type_is_rejected() {
        let f = fixture();
        let a = f.items.create(&item("Lamp", 1)).unwrap();
        assert!(matches!(
            f.items.patch(&a, &obj(json!({"quantity": "many"}))),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn null_for_required_column_is_rejected() {
        let f = fixture();
        let a = f.items.create(&item("Lamp", 1)).unwrap();
        assert!(matches!(
            f.items.patch(&a, &obj(json!({"quantity": null}))),
            Err(StoreError::InvalidInput(_))
        ));
        assert_eq!(f.items.get_or_fail(&a.id).unwrap().quantity, 1);

        match f.items.create(&json!({"quantity": 1})) {
            Err(StoreError::InvalidInput(msg)) => assert!(msg.contains("items.full_name"), "{msg}"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn update_one_by_matches_first_row() {
        let f = fixture();
        f.items.create(&item("Lamp", 1)).unwrap();
        let body = ItemUpdate {
            full_name: "Renamed".into(),
            quantity: 3,
            ..Default::default()
        };
        let updated = f
            .items
            .update_one_by(&json!({"full_name": "Lamp"}), &body)
            .unwrap()
            .unwrap();
        assert_eq!(updated.full_name, "Renamed");
        assert!(f
            .items
            .update_one_by(&json!({"full_name": "Lamp"}), &body)
            .unwrap()
            .is_none());
    }

    #[test]
    fn get_one_by_or_fail_names_entity() {
        let f = fixture();
        let err = f.users.get_one_by_or_fail(&json!({"email": "none@x.io"})).unwrap_err();
        assert_eq!(err.to_string(), "User not found");
    }

    #[test]
    fn clone_copies_everything_but_id() {
        let f = fixture();
        let a = f
            .items
            .create(&json!({"fullName": "Lamp", "description": "d", "quantity": 4}))
            .unwrap();
        let copy = f.items.clone_entity(&a, &Map::new()).unwrap();
        assert_ne!(copy.id, a.id);
        assert_eq!(
            Item { id: a.id.clone(), ..copy.clone() },
            a,
            "non-id columns should match"
        );
    }

    #[test]
    fn clone_applies_overrides() {
        let f = fixture();
        let a = f.items.create(&item("Lamp", 4)).unwrap();
        let copy = f
            .items
            .clone_entity(&a, &obj(json!({"fullName": "Lamp copy", "id": "ignored"})))
            .unwrap();
        assert_eq!(copy.full_name, "Lamp copy");
        assert_eq!(copy.quantity, 4);
        assert_ne!(copy.id.as_str(), "ignored");
    }

    #[test]
    fn clone_of_unique_row_is_duplicate_key() {
        let f = fixture();
        let u = f.users.create(&user("solo@x.io")).unwrap();
        assert!(matches!(
            f.users.clone_entity(&u, &Map::new()),
            Err(StoreError::DuplicateKey(_))
        ));
        let copy = f
            .users
            .clone_entity(&u, &obj(json!({"email": "second@x.io"})))
            .unwrap();
        assert_eq!(copy.password_hash, u.password_hash);
    }
}
