// Repository layer - every read and write of collections and users goes through these traits
mod json_file;
mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::{Category, Collection, Entity, RevokedToken, User};
use crate::resources::ResourceKind;

pub use self::json_file::JsonFileStore;
pub use self::sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate title")]
    DuplicateTitle,

    #[error("Entity not found")]
    EntityNotFound,

    #[error("Duplicate category name")]
    DuplicateCategory,

    #[error("Category not found")]
    CategoryNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt document: {0}")]
    Corrupt(String),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Collections of entities and their categories.
///
/// Implementations make each uniqueness check atomic with the write it
/// guards, so two concurrent creates with the same title cannot both land.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn collection(&self, kind: ResourceKind) -> Result<Collection, StoreError>;

    async fn entity(&self, kind: ResourceKind, id: &str) -> Result<Option<Entity>, StoreError>;

    /// Advisory check used before expensive work such as image uploads.
    /// The authoritative check happens inside `insert_entity`/`replace_entity`.
    async fn title_taken(
        &self,
        kind: ResourceKind,
        title: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let collection = self.collection(kind).await?;
        Ok(title_in_use(&collection.items, title, exclude_id))
    }

    async fn insert_entity(&self, kind: ResourceKind, entity: &Entity) -> Result<(), StoreError>;

    async fn replace_entity(&self, kind: ResourceKind, entity: &Entity) -> Result<(), StoreError>;

    async fn remove_entity(&self, kind: ResourceKind, id: &str) -> Result<Entity, StoreError>;

    /// Ids of every live entity across the given collections.
    async fn live_ids(&self, kinds: &[ResourceKind]) -> Result<HashSet<String>, StoreError> {
        let mut ids = HashSet::new();
        for &kind in kinds {
            let collection = self.collection(kind).await?;
            ids.extend(collection.items.into_iter().map(|e| e.id));
        }
        Ok(ids)
    }

    async fn insert_category(
        &self,
        kind: ResourceKind,
        category: &Category,
    ) -> Result<(), StoreError>;

    /// Replace the category stored under `id`. Entities of the same
    /// collection that pointed at `id` are moved to the new identifier.
    async fn replace_category(
        &self,
        kind: ResourceKind,
        id: &str,
        category: &Category,
    ) -> Result<(), StoreError>;

    async fn remove_category(&self, kind: ResourceKind, id: &str) -> Result<Category, StoreError>;
}

/// User records and the token revocation list.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    async fn set_token(&self, username: &str, token: Option<&str>) -> Result<(), StoreError>;

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Add a token to the revocation list, dropping entries that have expired.
    async fn revoke(&self, revoked: &RevokedToken) -> Result<(), StoreError>;

    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError>;
}

pub(crate) fn title_in_use(items: &[Entity], title: &str, exclude_id: Option<&str>) -> bool {
    items
        .iter()
        .any(|e| e.title() == title && Some(e.id.as_str()) != exclude_id)
}

pub(crate) fn name_in_use(categories: &[Category], name: &str, exclude_id: Option<&str>) -> bool {
    categories
        .iter()
        .any(|c| c.name == name && Some(c.id.as_str()) != exclude_id)
}

/// Point entities at a renamed category. Returns how many changed.
pub(crate) fn retarget_category(items: &mut [Entity], old_id: &str, new_id: &str) -> usize {
    if old_id == new_id {
        return 0;
    }
    let mut changed = 0;
    for entity in items.iter_mut() {
        if entity.category() == Some(old_id) {
            entity.set_text("category", new_id);
            changed += 1;
        }
    }
    changed
}
