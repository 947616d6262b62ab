use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension, Transaction};

use super::{retarget_category, ContentStore, StoreError, UserStore};
use crate::db::models::{Category, Collection, Entity, RevokedToken, User};
use crate::db::DbPool;
use crate::resources::ResourceKind;

/// Document-database backend: each entity is a JSON document in `entities`,
/// keyed by collection. Title and category-name uniqueness are UNIQUE
/// constraints, so the check and the write are one statement.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replace everything stored for one collection. Used by the JSON import.
    pub fn replace_collection(
        &self,
        kind: ResourceKind,
        collection: &Collection,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entities WHERE kind = ?1", params![kind.key()])?;
        tx.execute("DELETE FROM categories WHERE kind = ?1", params![kind.key()])?;
        for entity in &collection.items {
            insert_entity_row(&tx, kind, entity)?;
        }
        for category in &collection.categories {
            insert_category_row(&tx, kind, category)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace every user record. Used by the JSON import.
    pub fn replace_users(&self, users: &[User]) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM users", [])?;
        for user in users {
            tx.execute(
                "INSERT INTO users (username, password, token) VALUES (?1, ?2, ?3)",
                params![user.username, user.password_hash, user.token],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn insert_entity_row(
    tx: &Transaction<'_>,
    kind: ResourceKind,
    entity: &Entity,
) -> Result<(), StoreError> {
    let doc = serde_json::to_string(entity)?;
    tx.execute(
        "INSERT INTO entities (kind, id, title, doc) VALUES (?1, ?2, ?3, ?4)",
        params![kind.key(), entity.id, entity.title(), doc],
    )
    .map_err(|e| on_unique(e, StoreError::DuplicateTitle))?;
    Ok(())
}

fn insert_category_row(
    tx: &Transaction<'_>,
    kind: ResourceKind,
    category: &Category,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO categories (kind, id, name, color) VALUES (?1, ?2, ?3, ?4)",
        params![kind.key(), category.id, category.name, category.color],
    )
    .map_err(|e| on_unique(e, StoreError::DuplicateCategory))?;
    Ok(())
}

/// Map a UNIQUE/PRIMARY KEY violation to `conflict`, pass anything else through.
fn on_unique(err: rusqlite::Error, conflict: StoreError) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => conflict,
        _ => StoreError::Sql(err),
    }
}

fn parse_entity(doc: String) -> Result<Entity, StoreError> {
    Ok(serde_json::from_str(&doc)?)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        username: row.get(0)?,
        password_hash: row.get(1)?,
        token: row.get(2)?,
    })
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn collection(&self, kind: ResourceKind) -> Result<Collection, StoreError> {
        let conn = self.pool.get()?;

        let docs: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT doc FROM entities WHERE kind = ?1 ORDER BY rowid")?;
            let rows = stmt.query_map(params![kind.key()], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let items = docs
            .into_iter()
            .map(parse_entity)
            .collect::<Result<Vec<_>, _>>()?;

        let categories = {
            let mut stmt = conn.prepare(
                "SELECT id, name, color FROM categories WHERE kind = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![kind.key()], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    color: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(Collection { items, categories })
    }

    async fn entity(&self, kind: ResourceKind, id: &str) -> Result<Option<Entity>, StoreError> {
        let conn = self.pool.get()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM entities WHERE kind = ?1 AND id = ?2",
                params![kind.key(), id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(parse_entity).transpose()
    }

    async fn title_taken(
        &self,
        kind: ResourceKind,
        title: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM entities WHERE kind = ?1 AND title = ?2 AND id IS NOT ?3",
            params![kind.key(), title, exclude_id],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    async fn insert_entity(&self, kind: ResourceKind, entity: &Entity) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        insert_entity_row(&tx, kind, entity)?;
        tx.commit()?;
        Ok(())
    }

    async fn replace_entity(&self, kind: ResourceKind, entity: &Entity) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let doc = serde_json::to_string(entity)?;
        let rows = conn
            .execute(
                "UPDATE entities SET title = ?3, doc = ?4 WHERE kind = ?1 AND id = ?2",
                params![kind.key(), entity.id, entity.title(), doc],
            )
            .map_err(|e| on_unique(e, StoreError::DuplicateTitle))?;
        if rows == 0 {
            return Err(StoreError::EntityNotFound);
        }
        Ok(())
    }

    async fn remove_entity(&self, kind: ResourceKind, id: &str) -> Result<Entity, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM entities WHERE kind = ?1 AND id = ?2",
                params![kind.key(), id],
                |row| row.get(0),
            )
            .optional()?;
        let doc = doc.ok_or(StoreError::EntityNotFound)?;
        tx.execute(
            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
            params![kind.key(), id],
        )?;
        tx.commit()?;
        parse_entity(doc)
    }

    async fn insert_category(
        &self,
        kind: ResourceKind,
        category: &Category,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        insert_category_row(&tx, kind, category)?;
        tx.commit()?;
        Ok(())
    }

    async fn replace_category(
        &self,
        kind: ResourceKind,
        id: &str,
        category: &Category,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let rows = tx
            .execute(
                "UPDATE categories SET id = ?3, name = ?4, color = ?5 WHERE kind = ?1 AND id = ?2",
                params![kind.key(), id, category.id, category.name, category.color],
            )
            .map_err(|e| on_unique(e, StoreError::DuplicateCategory))?;
        if rows == 0 {
            return Err(StoreError::CategoryNotFound);
        }

        if id != category.id {
            let referencing: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, doc FROM entities WHERE kind = ?1 AND json_extract(doc, '$.category') = ?2",
                )?;
                let rows = stmt.query_map(params![kind.key(), id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };
            for (entity_id, doc) in referencing {
                let mut items = [parse_entity(doc)?];
                retarget_category(&mut items, id, &category.id);
                tx.execute(
                    "UPDATE entities SET doc = ?3 WHERE kind = ?1 AND id = ?2",
                    params![kind.key(), entity_id, serde_json::to_string(&items[0])?],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn remove_category(&self, kind: ResourceKind, id: &str) -> Result<Category, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let category = tx
            .query_row(
                "SELECT id, name, color FROM categories WHERE kind = ?1 AND id = ?2",
                params![kind.key(), id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        color: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::CategoryNotFound)?;
        tx.execute(
            "DELETE FROM categories WHERE kind = ?1 AND id = ?2",
            params![kind.key(), id],
        )?;
        tx.commit()?;
        Ok(category)
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT username, password, token FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()?)
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT username, password, token FROM users WHERE token = ?1",
                params![token],
                user_from_row,
            )
            .optional()?)
    }

    async fn set_token(&self, username: &str, token: Option<&str>) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE users SET token = ?2 WHERE username = ?1",
            params![username, token],
        )?;
        if rows == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO users (username, password, token) VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE SET
               password = excluded.password,
               token = excluded.token",
            params![user.username, user.password_hash, user.token],
        )?;
        Ok(())
    }

    async fn revoke(&self, revoked: &RevokedToken) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
            params![chrono::Utc::now().timestamp()],
        )?;
        tx.execute(
            "INSERT INTO revoked_tokens (token, expires_at) VALUES (?1, ?2)
             ON CONFLICT(token) DO UPDATE SET expires_at = excluded.expires_at",
            params![revoked.token, revoked.expires_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let revoked: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM revoked_tokens WHERE token = ?1",
            params![token],
            |row| row.get(0),
        )?;
        Ok(revoked)
    }
}
