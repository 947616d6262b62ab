//! One-shot import of the JSON documents into the SQLite backend.

use std::collections::HashSet;
use std::fmt;

use crate::db::models::Collection;
use crate::resources::ResourceKind;
use crate::store::{ContentStore, JsonFileStore, SqliteStore, StoreError};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub items: usize,
    pub categories: usize,
    /// Entries dropped because an earlier one already used the title or name.
    pub skipped: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub collections: Vec<(ResourceKind, CollectionReport)>,
    pub users: usize,
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, report) in &self.collections {
            writeln!(
                f,
                "{}: {} items, {} categories, {} skipped",
                kind,
                report.items,
                report.categories,
                report.skipped.len()
            )?;
        }
        write!(f, "users: {}", self.users)
    }
}

/// Replace the SQLite contents with what the JSON store holds.
pub async fn json_to_sqlite(
    source: &JsonFileStore,
    target: &SqliteStore,
) -> Result<MigrationReport, StoreError> {
    let mut report = MigrationReport::default();

    for kind in ResourceKind::ALL {
        let (collection, skipped) = dedupe(source.collection(kind).await?);
        for entry in &skipped {
            tracing::warn!("Skipping duplicate {} entry '{}'", kind, entry);
        }
        target.replace_collection(kind, &collection)?;
        tracing::info!(
            "Imported {} {} and {} categories",
            collection.items.len(),
            kind,
            collection.categories.len()
        );
        report.collections.push((
            kind,
            CollectionReport {
                items: collection.items.len(),
                categories: collection.categories.len(),
                skipped,
            },
        ));
    }

    let users = source.users().await?;
    target.replace_users(&users)?;
    report.users = users.len();
    tracing::info!("Imported {} users", report.users);

    Ok(report)
}

/// Keep the first entity per title and the first category per name.
fn dedupe(collection: Collection) -> (Collection, Vec<String>) {
    let mut skipped = Vec::new();

    let mut titles = HashSet::new();
    let items = collection
        .items
        .into_iter()
        .filter(|e| {
            let fresh = titles.insert(e.title().to_string());
            if !fresh {
                skipped.push(e.title().to_string());
            }
            fresh
        })
        .collect();

    let mut names = HashSet::new();
    let categories = collection
        .categories
        .into_iter()
        .filter(|c| {
            let fresh = names.insert(c.name.clone());
            if !fresh {
                skipped.push(c.name.clone());
            }
            fresh
        })
        .collect();

    (Collection { items, categories }, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::db::models::{Category, User};
    use crate::store::contract::entity;
    use crate::store::UserStore;

    #[tokio::test]
    async fn imports_everything_and_replaces_target() {
        let tmp = tempfile::tempdir().unwrap();
        let source = JsonFileStore::new(tmp.path());
        source
            .insert_entity(ResourceKind::Projects, &entity("p1", "Presa", "Agua"))
            .await
            .unwrap();
        source
            .insert_category(ResourceKind::Projects, &Category::named("Agua", "#00f"))
            .await
            .unwrap();
        source
            .insert_entity(ResourceKind::Jobs, &entity("j1", "Geólogo", "Campo"))
            .await
            .unwrap();
        source
            .upsert_user(&User {
                username: "admin".into(),
                password_hash: "h".into(),
                token: None,
            })
            .await
            .unwrap();

        let target = SqliteStore::new(memory_pool());
        target
            .insert_entity(ResourceKind::News, &entity("stale", "Vieja", ""))
            .await
            .unwrap();

        let report = json_to_sqlite(&source, &target).await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(report.collections.len(), 3);
        assert_eq!(report.collections[0].1.items, 1);
        assert_eq!(report.collections[0].1.categories, 1);

        let projects = target.collection(ResourceKind::Projects).await.unwrap();
        assert_eq!(projects.items[0].title(), "Presa");
        assert_eq!(projects.categories, vec![Category::named("Agua", "#00f")]);
        assert!(target
            .collection(ResourceKind::News)
            .await
            .unwrap()
            .items
            .is_empty());
        assert!(target.user_by_name("admin").await.unwrap().is_some());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let collection = Collection {
            items: vec![
                entity("a", "Hola", ""),
                entity("b", "Hola", ""),
                entity("c", "Adiós", ""),
            ],
            categories: vec![Category::named("X", "#1"), Category::named("X", "#2")],
        };
        let (clean, skipped) = dedupe(collection);
        let ids: Vec<_> = clean.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(clean.categories, vec![Category::named("X", "#1")]);
        assert_eq!(skipped, vec!["Hola", "X"]);
    }
}
