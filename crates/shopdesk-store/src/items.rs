use serde::{Deserialize, Serialize};
use shopdesk_core::ids::EntityId;

use crate::entity::{Column, Entity, EntityDescriptor, Relation, STANDARD_COLUMNS};
use crate::users::User;

const COLUMNS: [Column; 9] = [
    STANDARD_COLUMNS[0],
    STANDARD_COLUMNS[1],
    STANDARD_COLUMNS[2],
    STANDARD_COLUMNS[3],
    STANDARD_COLUMNS[4],
    Column::text("full_name"),
    Column::text("description"),
    Column::integer("quantity"),
    Column::text("owner_id"),
];

const RELATIONS: [Relation; 1] = [Relation::many_to_one("owner", "users", "owner_id")];

static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: "Item",
    table: "items",
    columns: &COLUMNS,
    relations: &RELATIONS,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: EntityId,
    pub full_name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub owner_id: Option<EntityId>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    /// Present only when the `owner` relation was included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<User>,
}

impl Entity for Item {
    fn descriptor() -> &'static EntityDescriptor {
        &DESCRIPTOR
    }

    fn id(&self) -> &EntityId {
        &self.id
    }
}

/// Body of a create request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCreate {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<EntityId>,
}

/// Body of a full update. Omitted fields take their defaults and overwrite
/// what is stored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemUpdate {
    pub full_name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub owner_id: Option<EntityId>,
}
