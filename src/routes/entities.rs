//! List, create, update and delete for projects, news and jobs.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::Value;

use crate::db::models::{Collection, Entity};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, EntityForm};
use crate::media::{self, MediaError};
use crate::resources::ResourceKind;
use crate::state::AppState;

pub const PRIMARY_IMAGE_FAILED: &str = "Error procesando la imagen principal.";

/// GET /{kind}
pub async fn list(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
) -> AppResult<Json<Collection>> {
    let collection = state.store.collection(kind).await?;
    Ok(Json(collection))
}

/// POST /{kind}
pub async fn create(
    user: CurrentUser,
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    form: EntityForm,
) -> AppResult<Json<Entity>> {
    kind.validate_create(&form.fields, |slot| form.has_file(slot))?;

    let mut entity = kind.new_entity(&form.fields);
    // Checked again atomically on insert; this avoids uploading for nothing.
    if state.store.title_taken(kind, entity.title(), None).await? {
        return Err(AppError::validation(kind.duplicate_title_message()));
    }

    let _uploading = state.hold_uploads().await;
    if kind.has_images() {
        if let Err(e) = attach_new_images(&state, kind, &mut entity, &form).await {
            discard_images(&state, &entity.id).await;
            return Err(e);
        }
    }

    if let Err(e) = state.store.insert_entity(kind, &entity).await {
        if kind.has_images() {
            discard_images(&state, &entity.id).await;
        }
        return Err(kind.store_error(e));
    }

    tracing::info!("{} created {} {}", user.username, kind, entity.id);
    Ok(Json(entity))
}

/// PUT /{kind}/{id}
pub async fn update(
    user: CurrentUser,
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
    form: EntityForm,
) -> AppResult<Json<Entity>> {
    kind.validate_title(&form.fields)?;

    let existing = state
        .store
        .entity(kind, &id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.not_found_message()))?;

    let mut entity = Entity::new(id);
    entity.fields = kind.whitelist(&form.fields);
    if state
        .store
        .title_taken(kind, entity.title(), Some(&entity.id))
        .await?
    {
        return Err(AppError::validation(kind.duplicate_title_message()));
    }

    for &slot in kind.image_slots() {
        entity.set_text(slot, kept_image(&state, &existing, &form, slot));
    }

    // Files are only written once the title has been accepted.
    state
        .store
        .replace_entity(kind, &entity)
        .await
        .map_err(|e| kind.store_error(e))?;

    if kind.has_images() && replace_uploaded_images(&state, kind, &mut entity, &form).await {
        state
            .store
            .replace_entity(kind, &entity)
            .await
            .map_err(|e| kind.store_error(e))?;
    }

    tracing::info!("{} updated {} {}", user.username, kind, entity.id);
    Ok(Json(entity))
}

/// DELETE /{kind}/{id}
pub async fn remove(
    user: CurrentUser,
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
) -> AppResult<Json<Entity>> {
    let removed = state
        .store
        .remove_entity(kind, &id)
        .await
        .map_err(|e| kind.store_error(e))?;
    tracing::info!("{} deleted {} {}", user.username, kind, removed.id);

    if kind.has_images() {
        let store = state.store.as_ref();
        let images = state.images.as_ref();
        if let Err(e) = media::remove_entity_images(store, images, &removed.id).await {
            tracing::error!("Could not remove images of {} {}: {}", kind, removed.id, e);
        }
        if let Err(e) = state.sweep_orphans().await {
            tracing::error!("Image folder reconciliation failed: {}", e);
        }
    }

    Ok(Json(removed))
}

/// Fill every image slot of a new entity: uploaded files are transcoded and
/// stored, missing ones get the placeholder. Only a primary image that cannot
/// be decoded fails the request.
async fn attach_new_images(
    state: &AppState,
    kind: ResourceKind,
    entity: &mut Entity,
    form: &EntityForm,
) -> Result<(), AppError> {
    let placeholder = &state.config.storage.placeholder;
    for &slot in kind.image_slots() {
        let Some(upload) = form.files.get(slot) else {
            entity.set_text(slot, placeholder.as_str());
            continue;
        };
        let result = media::store_upload(
            state.images.as_ref(),
            &entity.id,
            slot,
            upload.clone(),
            state.config.images.jpeg_quality,
        )
        .await;
        match result {
            Ok(reference) => entity.set_text(slot, reference),
            Err(MediaError::Image(e)) if kind.required_image() == Some(slot) => {
                tracing::error!("Could not process {} of {}: {}", slot, entity.id, e);
                return Err(AppError::Internal(PRIMARY_IMAGE_FAILED.to_string()));
            }
            Err(e) => {
                tracing::warn!("Using placeholder for {} of {}: {}", slot, entity.id, e);
                entity.set_text(slot, placeholder.as_str());
            }
        }
    }
    Ok(())
}

/// Reference a slot keeps on update when no new file is stored: a reference
/// sent back by the client when it points into the image tree, otherwise the
/// previous value or the placeholder.
fn kept_image(state: &AppState, existing: &Entity, form: &EntityForm, slot: &str) -> String {
    let previous = existing
        .text(slot)
        .filter(|s| !s.is_empty())
        .unwrap_or(state.config.storage.placeholder.as_str())
        .to_string();
    if form.has_file(slot) {
        return previous;
    }
    form.fields
        .get(slot)
        .and_then(Value::as_str)
        .and_then(|raw| state.images.accept_reference(raw))
        .unwrap_or(previous)
}

/// Store the files sent for an already saved entity, overwriting its images
/// in place. Failed slots keep their reference. Returns whether any
/// reference changed.
async fn replace_uploaded_images(
    state: &AppState,
    kind: ResourceKind,
    entity: &mut Entity,
    form: &EntityForm,
) -> bool {
    let mut changed = false;
    let _uploading = state.hold_uploads().await;
    for &slot in kind.image_slots() {
        let Some(upload) = form.files.get(slot) else {
            continue;
        };
        let result = media::store_upload(
            state.images.as_ref(),
            &entity.id,
            slot,
            upload.clone(),
            state.config.images.jpeg_quality,
        )
        .await;
        match result {
            Ok(reference) if entity.text(slot) != Some(reference.as_str()) => {
                entity.set_text(slot, reference);
                changed = true;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Keeping previous {} of {}: {}", slot, entity.id, e),
        }
    }
    changed
}

async fn discard_images(state: &AppState, entity_id: &str) {
    if let Err(e) = state.images.remove_folder(entity_id).await {
        tracing::warn!("Could not discard images of {}: {}", entity_id, e);
    }
}
