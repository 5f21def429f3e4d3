//! Entity metadata.
//!
//! Each stored entity declares a static [`EntityDescriptor`]: its table,
//! columns and relations. Filters, joins, includes and ordering are all
//! resolved against descriptors, so unknown names are rejected before any
//! SQL is built.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shopdesk_core::ids::EntityId;

pub const ID_COLUMN: &str = "id";
pub const IS_ACTIVE_COLUMN: &str = "is_active";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const DELETED_AT_COLUMN: &str = "deleted_at";

/// Storage class of a column, used to map SQLite values to JSON and back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Stored as INTEGER 0/1.
    Boolean,
    /// RFC 3339 text.
    Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }
}

/// The bookkeeping columns every entity table carries, in table order.
pub const STANDARD_COLUMNS: [Column; 5] = [
    Column::text(ID_COLUMN),
    Column::boolean(IS_ACTIVE_COLUMN),
    Column::timestamp(CREATED_AT_COLUMN),
    Column::timestamp(UPDATED_AT_COLUMN),
    Column::timestamp(DELETED_AT_COLUMN),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// This table holds the foreign key; at most one related row.
    ManyToOne,
    /// The target table holds the foreign key; any number of related rows.
    OneToMany,
}

/// A named link from one entity to another.
///
/// `local_column` lives on the owning table, `remote_column` on the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub target_table: &'static str,
    pub kind: RelationKind,
    pub local_column: &'static str,
    pub remote_column: &'static str,
}

impl Relation {
    pub const fn many_to_one(
        name: &'static str,
        target_table: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            target_table,
            kind: RelationKind::ManyToOne,
            local_column: foreign_key,
            remote_column: ID_COLUMN,
        }
    }

    pub const fn one_to_many(
        name: &'static str,
        target_table: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            target_table,
            kind: RelationKind::OneToMany,
            local_column: ID_COLUMN,
            remote_column: foreign_key,
        }
    }
}

#[derive(Debug)]
pub struct EntityDescriptor {
    /// Human-readable name used in "<name> not found" errors.
    pub name: &'static str,
    pub table: &'static str,
    /// Every column, in table order, including [`STANDARD_COLUMNS`].
    pub columns: &'static [Column],
    pub relations: &'static [Relation],
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Comma-separated, alias-qualified select list in column order.
    pub fn select_list(&self, alias: &str) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}.{}", quote_ident(alias), quote_ident(c.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Columns a caller may write through create/update/patch.
    pub fn writable_columns(&self) -> impl Iterator<Item = &'static Column> {
        self.columns.iter().filter(|c| {
            !matches!(
                c.name,
                ID_COLUMN | CREATED_AT_COLUMN | UPDATED_AT_COLUMN | DELETED_AT_COLUMN
            )
        })
    }
}

/// Double-quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A stored entity with a static descriptor.
///
/// Rows are materialized as JSON objects keyed by column name (plus any
/// included relations) and then deserialized into `Self`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn descriptor() -> &'static EntityDescriptor;

    fn id(&self) -> &EntityId;
}

/// Lookup of descriptors by table name, used to resolve relation targets.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    by_table: HashMap<&'static str, &'static EntityDescriptor>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every entity this crate defines.
    pub fn standard() -> Self {
        Self::new()
            .with(crate::users::User::descriptor())
            .with(crate::items::Item::descriptor())
    }

    pub fn with(mut self, descriptor: &'static EntityDescriptor) -> Self {
        self.by_table.insert(descriptor.table, descriptor);
        self
    }

    pub fn get(&self, table: &str) -> Option<&'static EntityDescriptor> {
        self.by_table.get(table).copied()
    }

    pub fn len(&self) -> usize {
        self.by_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }
}
