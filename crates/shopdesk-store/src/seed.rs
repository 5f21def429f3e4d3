use tracing::info;

use crate::error::StoreError;
use crate::repository::Repository;
use crate::users::{Role, User, UserCreate};

pub const ADMIN_EMAIL: &str = "admin@admin.com";
pub const ADMIN_DISPLAY_NAME: &str = "Admin";
const ADMIN_PASSWORD: &str = "admin";

pub fn hash_password(password: &str) -> Result<String, StoreError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| StoreError::Credential(e.to_string()))
}

/// Create the default administrator when the users table is empty.
/// Returns the created user, or `None` when users already exist.
pub fn seed_admin(users: &Repository<User>) -> Result<Option<User>, StoreError> {
    if users.count_all()? > 0 {
        return Ok(None);
    }
    let admin = users.create(&UserCreate {
        email: ADMIN_EMAIL.to_string(),
        password_hash: hash_password(ADMIN_PASSWORD)?,
        role: Role::Admin,
        display_name: Some(ADMIN_DISPLAY_NAME.to_string()),
        phone_number: None,
        is_verified: true,
    })?;
    info!(id = %admin.id, email = ADMIN_EMAIL, "seeded admin user");
    Ok(Some(admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::entity::EntityRegistry;
    use std::sync::Arc;

    fn users() -> Repository<User> {
        Repository::new(
            Database::in_memory().unwrap(),
            Arc::new(EntityRegistry::standard()),
        )
    }

    #[test]
    fn seeds_once() {
        let repo = users();
        let admin = seed_admin(&repo).unwrap().unwrap();
        assert_eq!(admin.email, ADMIN_EMAIL);
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.is_verified);
        assert!(bcrypt::verify(ADMIN_PASSWORD, &admin.password_hash).unwrap());

        assert!(seed_admin(&repo).unwrap().is_none());
        assert_eq!(repo.count_all().unwrap(), 1);
    }

    #[test]
    fn skips_when_users_exist() {
        let repo = users();
        repo.create(&serde_json::json!({"email": "someone@x.io", "passwordHash": "h"}))
            .unwrap();
        assert!(seed_admin(&repo).unwrap().is_none());
    }
}
