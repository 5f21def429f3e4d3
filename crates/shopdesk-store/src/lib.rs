pub mod database;
pub mod entity;
pub mod error;
pub mod items;
pub mod query;
pub mod repository;
pub mod row_helpers;
pub mod schema;
pub mod seed;
pub mod users;

pub use database::Database;
pub use entity::{Entity, EntityDescriptor, EntityRegistry};
pub use error::StoreError;
pub use query::{FilterError, FilterParams, FilterQuery, Pagination};
pub use repository::{Paged, Repository};
