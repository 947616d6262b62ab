use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;

use crate::config::ImageBackend;
use crate::error::{AppError, AppResult};
use crate::media::is_safe_segment;
use crate::resources::{ResourceKind, NEWS_IMAGE};
use crate::state::AppState;

const IMAGE_NOT_FOUND: &str = "Imagen no encontrada.";

pub fn router() -> Router<AppState> {
    Router::new().route("/news/{id}/image", get(image))
}

/// GET /news/{id}/image
///
/// The stored image of a news item, or the placeholder when there is none.
/// With remote storage the client is redirected to the CDN copy.
pub async fn image(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    if is_safe_segment(&id) {
        match state.config.images.backend {
            ImageBackend::Local => {
                let path = state
                    .config
                    .images_path()
                    .join(&id)
                    .join(format!("{}.jpg", NEWS_IMAGE));
                if let Ok(bytes) = tokio::fs::read(&path).await {
                    return Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response());
                }
            }
            ImageBackend::Bunny => {
                let reference = state
                    .store
                    .entity(ResourceKind::News, &id)
                    .await?
                    .and_then(|news| news.text(NEWS_IMAGE).map(str::to_string))
                    .filter(|r| r.starts_with("http"));
                if let Some(url) = reference {
                    return Ok(Redirect::temporary(&url).into_response());
                }
            }
        }
    }
    placeholder(&state).await
}

async fn placeholder(state: &AppState) -> AppResult<Response> {
    let path = state.config.placeholder_file();
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Placeholder image missing at {}", path.display());
            Err(AppError::not_found(IMAGE_NOT_FOUND))
        }
        Err(e) => Err(e.into()),
    }
}
