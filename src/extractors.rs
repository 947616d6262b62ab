use std::collections::{BTreeMap, HashMap};

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Multipart, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::Json;
use serde_json::Value;

use crate::auth::session::{bearer_token, resolve_token, TOKEN_REQUIRED};
use crate::error::AppError;
use crate::state::AppState;

/// The user behind the request's bearer token.
/// Rejects with 401 when the token is missing, invalid, expired or revoked.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| AppError::auth(TOKEN_REQUIRED))?;
        let user = resolve_token(state.users.as_ref(), &state.tokens, token).await?;
        Ok(CurrentUser {
            username: user.username,
        })
    }
}

/// Submitted entity data: text fields plus any uploaded files keyed by
/// field name. Accepts `multipart/form-data` or a JSON object.
#[derive(Debug, Default)]
pub struct EntityForm {
    pub fields: BTreeMap<String, Value>,
    pub files: HashMap<String, Bytes>,
}

impl EntityForm {
    pub fn has_file(&self, slot: &str) -> bool {
        self.files.contains_key(slot)
    }
}

impl FromRequest<AppState> for EntityForm {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            return read_multipart(multipart).await;
        }

        let Json(fields) = Json::<BTreeMap<String, Value>>::from_request(req, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        Ok(EntityForm {
            fields,
            files: HashMap::new(),
        })
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<EntityForm, AppError> {
    let mut form = EntityForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            // Browsers send an empty part for file inputs left blank.
            if !data.is_empty() {
                form.files.insert(name, data);
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            form.fields.insert(name, Value::String(text));
        }
    }
    Ok(form)
}
