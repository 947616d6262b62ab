use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::db::models::Category;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::resources::{ResourceKind, CATEGORY_FIELDS_REQUIRED};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CategoryInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl CategoryInput {
    /// Both fields are required and trimmed; the name doubles as the id.
    fn into_category(self) -> Result<Category, AppError> {
        let name = self.name.unwrap_or_default();
        let color = self.color.unwrap_or_default();
        let (name, color) = (name.trim(), color.trim());
        if name.is_empty() || color.is_empty() {
            return Err(AppError::validation(CATEGORY_FIELDS_REQUIRED));
        }
        Ok(Category::named(name, color))
    }
}

/// POST /{kind}/categories
pub async fn create(
    user: CurrentUser,
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Json(input): Json<CategoryInput>,
) -> AppResult<Json<Category>> {
    let category = input.into_category()?;
    state
        .store
        .insert_category(kind, &category)
        .await
        .map_err(|e| kind.store_error(e))?;
    tracing::info!("{} added {} category {}", user.username, kind, category.name);
    Ok(Json(category))
}

/// PUT /{kind}/categories/{id}
pub async fn update(
    user: CurrentUser,
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
    Json(input): Json<CategoryInput>,
) -> AppResult<Json<Category>> {
    let category = input.into_category()?;
    state
        .store
        .replace_category(kind, &id, &category)
        .await
        .map_err(|e| kind.store_error(e))?;
    tracing::info!(
        "{} updated {} category {} -> {}",
        user.username,
        kind,
        id,
        category.name
    );
    Ok(Json(category))
}

/// DELETE /{kind}/categories/{id}
///
/// Entities keep their category value; clients show it as uncategorized.
pub async fn remove(
    user: CurrentUser,
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
) -> AppResult<Json<Category>> {
    let removed = state
        .store
        .remove_category(kind, &id)
        .await
        .map_err(|e| kind.store_error(e))?;
    tracing::info!("{} removed {} category {}", user.username, kind, removed.name);
    Ok(Json(removed))
}
