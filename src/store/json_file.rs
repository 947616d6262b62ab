use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{name_in_use, retarget_category, title_in_use, ContentStore, StoreError, UserStore};
use crate::db::models::{Category, Collection, Entity, RevokedToken, User};
use crate::resources::ResourceKind;

/// Flat JSON documents in one directory: `projects.json`, `news.json`,
/// `jobs.json`, `users.json` and `revoked_tokens.json`.
///
/// Every mutation holds the document's mutex across read, check and write,
/// and the write goes through a temp file plus rename.
pub struct JsonFileStore {
    dir: PathBuf,
    collection_locks: [Mutex<()>; 3],
    users_lock: Mutex<()>,
    revoked_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            collection_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
            users_lock: Mutex::new(()),
            revoked_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn collection_path(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.key()))
    }

    fn users_path(&self) -> PathBuf {
        self.dir.join("users.json")
    }

    fn revoked_path(&self) -> PathBuf {
        self.dir.join("revoked_tokens.json")
    }

    fn lock_for(&self, kind: ResourceKind) -> &Mutex<()> {
        let idx = match kind {
            ResourceKind::Projects => 0,
            ResourceKind::News => 1,
            ResourceKind::Jobs => 2,
        };
        &self.collection_locks[idx]
    }

    async fn read_collection(&self, kind: ResourceKind) -> Result<Collection, StoreError> {
        let path = self.collection_path(kind);
        let Some(mut doc) = read_json::<Value>(&path).await? else {
            return Ok(Collection::default());
        };
        Ok(Collection {
            items: take_array(&mut doc, kind.key(), &path)?,
            categories: take_array(&mut doc, "categories", &path)?,
        })
    }

    async fn write_collection(
        &self,
        kind: ResourceKind,
        collection: &Collection,
    ) -> Result<(), StoreError> {
        let doc = serde_json::json!({
            kind.key(): collection.items,
            "categories": collection.categories,
        });
        write_json(&self.collection_path(kind), &doc).await
    }

    /// Read, change and write back one collection under its lock. Nothing is
    /// written when `change` fails.
    async fn mutate<R: Send>(
        &self,
        kind: ResourceKind,
        change: impl FnOnce(&mut Collection) -> Result<R, StoreError> + Send,
    ) -> Result<R, StoreError> {
        let _guard = self.lock_for(kind).lock().await;
        let mut collection = self.read_collection(kind).await?;
        let out = change(&mut collection)?;
        self.write_collection(kind, &collection).await?;
        Ok(out)
    }

    async fn read_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(read_json(&self.users_path()).await?.unwrap_or_default())
    }

    async fn read_revoked(&self) -> Result<Vec<RevokedToken>, StoreError> {
        Ok(read_json(&self.revoked_path()).await?.unwrap_or_default())
    }

    /// Every user record, for migrations.
    pub async fn users(&self) -> Result<Vec<User>, StoreError> {
        self.read_users().await
    }
}

#[async_trait]
impl ContentStore for JsonFileStore {
    async fn collection(&self, kind: ResourceKind) -> Result<Collection, StoreError> {
        self.read_collection(kind).await
    }

    async fn entity(&self, kind: ResourceKind, id: &str) -> Result<Option<Entity>, StoreError> {
        let collection = self.read_collection(kind).await?;
        Ok(collection.items.into_iter().find(|e| e.id == id))
    }

    async fn insert_entity(&self, kind: ResourceKind, entity: &Entity) -> Result<(), StoreError> {
        self.mutate(kind, |c| {
            if title_in_use(&c.items, entity.title(), None) {
                return Err(StoreError::DuplicateTitle);
            }
            c.items.push(entity.clone());
            Ok(())
        })
        .await
    }

    async fn replace_entity(&self, kind: ResourceKind, entity: &Entity) -> Result<(), StoreError> {
        self.mutate(kind, |c| {
            let idx = c
                .items
                .iter()
                .position(|e| e.id == entity.id)
                .ok_or(StoreError::EntityNotFound)?;
            if title_in_use(&c.items, entity.title(), Some(&entity.id)) {
                return Err(StoreError::DuplicateTitle);
            }
            c.items[idx] = entity.clone();
            Ok(())
        })
        .await
    }

    async fn remove_entity(&self, kind: ResourceKind, id: &str) -> Result<Entity, StoreError> {
        self.mutate(kind, |c| {
            let idx = c
                .items
                .iter()
                .position(|e| e.id == id)
                .ok_or(StoreError::EntityNotFound)?;
            Ok(c.items.remove(idx))
        })
        .await
    }

    async fn insert_category(
        &self,
        kind: ResourceKind,
        category: &Category,
    ) -> Result<(), StoreError> {
        self.mutate(kind, |c| {
            if name_in_use(&c.categories, &category.name, None) {
                return Err(StoreError::DuplicateCategory);
            }
            c.categories.push(category.clone());
            Ok(())
        })
        .await
    }

    async fn replace_category(
        &self,
        kind: ResourceKind,
        id: &str,
        category: &Category,
    ) -> Result<(), StoreError> {
        self.mutate(kind, |c| {
            let idx = c
                .categories
                .iter()
                .position(|cat| cat.id == id)
                .ok_or(StoreError::CategoryNotFound)?;
            if name_in_use(&c.categories, &category.name, Some(id)) {
                return Err(StoreError::DuplicateCategory);
            }
            c.categories[idx] = category.clone();
            let moved = retarget_category(&mut c.items, id, &category.id);
            if moved > 0 {
                tracing::info!("Moved {} {} to category {}", moved, kind, category.id);
            }
            Ok(())
        })
        .await
    }

    async fn remove_category(&self, kind: ResourceKind, id: &str) -> Result<Category, StoreError> {
        self.mutate(kind, |c| {
            let idx = c
                .categories
                .iter()
                .position(|cat| cat.id == id)
                .ok_or(StoreError::CategoryNotFound)?;
            Ok(c.categories.remove(idx))
        })
        .await
    }
}

#[async_trait]
impl UserStore for JsonFileStore {
    async fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.read_users().await?;
        Ok(users.into_iter().find(|u| u.username == username))
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let users = self.read_users().await?;
        Ok(users
            .into_iter()
            .find(|u| u.token.as_deref() == Some(token)))
    }

    async fn set_token(&self, username: &str, token: Option<&str>) -> Result<(), StoreError> {
        let _guard = self.users_lock.lock().await;
        let mut users = self.read_users().await?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or(StoreError::UserNotFound)?;
        user.token = token.map(str::to_string);
        write_json(&self.users_path(), &users).await
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let _guard = self.users_lock.lock().await;
        let mut users = self.read_users().await?;
        match users.iter_mut().find(|u| u.username == user.username) {
            Some(existing) => *existing = user.clone(),
            None => users.push(user.clone()),
        }
        write_json(&self.users_path(), &users).await
    }

    async fn revoke(&self, revoked: &RevokedToken) -> Result<(), StoreError> {
        let _guard = self.revoked_lock.lock().await;
        let now = chrono::Utc::now().timestamp();
        let mut list = self.read_revoked().await?;
        list.retain(|r| r.expires_at > now && r.token != revoked.token);
        list.push(revoked.clone());
        write_json(&self.revoked_path(), &list).await
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        let list = self.read_revoked().await?;
        Ok(list.iter().any(|r| r.token == token))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn take_array<T: DeserializeOwned>(
    doc: &mut Value,
    key: &str,
    path: &Path,
) -> Result<Vec<T>, StoreError> {
    match doc.get_mut(key).map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v @ Value::Array(_)) => Ok(serde_json::from_value(v)?),
        Some(_) => Err(StoreError::Corrupt(format!(
            "{}: `{}` is not an array",
            path.display(),
            key
        ))),
    }
}
