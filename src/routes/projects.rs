use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::resources::ResourceKind;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/projects/{id}/images", get(images))
}

/// GET /projects/{id}/images
///
/// Every slot is present; empty ones report the placeholder.
pub async fn images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let kind = ResourceKind::Projects;
    let project = state
        .store
        .entity(kind, &id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.not_found_message()))?;

    let placeholder = &state.config.storage.placeholder;
    let slots: Map<String, Value> = kind
        .image_slots()
        .iter()
        .map(|&slot| {
            let reference = project
                .text(slot)
                .filter(|s| !s.is_empty())
                .unwrap_or(placeholder.as_str());
            (slot.to_string(), Value::String(reference.to_string()))
        })
        .collect();
    Ok(Json(Value::Object(slots)))
}
