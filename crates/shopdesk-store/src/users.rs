use serde::{Deserialize, Serialize};
use shopdesk_core::ids::EntityId;

use crate::entity::{Column, Entity, EntityDescriptor, Relation, STANDARD_COLUMNS};
use crate::items::Item;

const COLUMNS: [Column; 13] = [
    STANDARD_COLUMNS[0],
    STANDARD_COLUMNS[1],
    STANDARD_COLUMNS[2],
    STANDARD_COLUMNS[3],
    STANDARD_COLUMNS[4],
    Column::text("role"),
    Column::text("display_name"),
    Column::text("password_hash"),
    Column::text("email"),
    Column::text("phone_number"),
    Column::text("avatar_url"),
    Column::boolean("is_verified"),
    Column::text("verification_code"),
];

const RELATIONS: [Relation; 1] = [Relation::one_to_many("items", "items", "owner_id")];

static DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    name: "User",
    table: "users",
    columns: &COLUMNS,
    relations: &RELATIONS,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub role: Role,
    pub display_name: String,
    /// Never serialized into responses.
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub avatar_url: String,
    pub is_verified: bool,
    #[serde(default, skip_serializing)]
    pub verification_code: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    /// Present only when the `items` relation was included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

impl Entity for User {
    fn descriptor() -> &'static EntityDescriptor {
        &DESCRIPTOR
    }

    fn id(&self) -> &EntityId {
        &self.id
    }
}

/// Fields accepted when creating a user. The password must already be hashed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreate {
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}
