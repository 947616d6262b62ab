//! The three resource collections and the rules that differ between them:
//! field whitelists, image slots, required inputs and user-facing messages.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde_json::Value;

use crate::db::models::Entity;
use crate::error::AppError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Projects,
    News,
    Jobs,
}

const PROJECT_FIELDS: &[&str] = &[
    "title",
    "tipo",
    "tema",
    "entidadContratante",
    "paisOrigen",
    "tipo2",
    "objeto",
    "fechaInicial",
    "fechaFinal",
    "consorcio",
    "integrantes",
    "descripcion",
    "category",
];
const NEWS_FIELDS: &[&str] = &[
    "title",
    "description",
    "category",
    "date",
    "featured",
    "author",
    "readTime",
];
const JOB_FIELDS: &[&str] = &["title", "description", "date", "category"];

pub const PRIMARY_IMAGE: &str = "imagenPrincipal";
pub const NEWS_IMAGE: &str = "image";

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Projects, ResourceKind::News, ResourceKind::Jobs];

    /// Collections whose entities own a folder in the image store.
    pub const WITH_IMAGES: [ResourceKind; 2] = [ResourceKind::Projects, ResourceKind::News];

    /// URL segment, JSON document key and storage discriminator.
    pub fn key(self) -> &'static str {
        match self {
            ResourceKind::Projects => "projects",
            ResourceKind::News => "news",
            ResourceKind::Jobs => "jobs",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    pub fn fields(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Projects => PROJECT_FIELDS,
            ResourceKind::News => NEWS_FIELDS,
            ResourceKind::Jobs => JOB_FIELDS,
        }
    }

    pub fn image_slots(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Projects => &[PRIMARY_IMAGE, "image1", "image2"],
            ResourceKind::News => &[NEWS_IMAGE],
            ResourceKind::Jobs => &[],
        }
    }

    pub fn has_images(self) -> bool {
        !self.image_slots().is_empty()
    }

    pub fn required_image(self) -> Option<&'static str> {
        match self {
            ResourceKind::Projects => Some(PRIMARY_IMAGE),
            _ => None,
        }
    }

    fn requires_category(self) -> bool {
        matches!(self, ResourceKind::Jobs)
    }

    fn date_fields(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Projects => &["fechaInicial", "fechaFinal"],
            _ => &[],
        }
    }

    pub fn not_found_message(self) -> &'static str {
        match self {
            ResourceKind::Projects => "Proyecto no encontrado.",
            ResourceKind::News => "Noticia no encontrada.",
            ResourceKind::Jobs => "Oferta no encontrada.",
        }
    }

    pub fn duplicate_title_message(self) -> &'static str {
        match self {
            ResourceKind::Projects => "Ya existe un proyecto con ese título.",
            ResourceKind::News => "Ya existe una noticia con ese título.",
            ResourceKind::Jobs => "Ya existe una oferta con ese título.",
        }
    }

    /// Translate store outcomes into the messages this collection shows.
    pub fn store_error(self, err: StoreError) -> AppError {
        match err {
            StoreError::DuplicateTitle => AppError::validation(self.duplicate_title_message()),
            StoreError::EntityNotFound => AppError::not_found(self.not_found_message()),
            StoreError::DuplicateCategory => AppError::validation(DUPLICATE_CATEGORY),
            StoreError::CategoryNotFound => AppError::not_found(CATEGORY_NOT_FOUND),
            other => AppError::Store(other),
        }
    }

    /// Build the stored text fields from submitted input. Whitelisted keys
    /// only; anything missing becomes an empty string.
    pub fn whitelist(self, input: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for &key in self.fields() {
            let value = match input.get(key) {
                None | Some(Value::Null) => Value::String(String::new()),
                Some(v) => v.clone(),
            };
            let value = if self.date_fields().contains(&key) {
                Value::String(normalize_date(value.as_str().unwrap_or("")))
            } else {
                value
            };
            out.insert(key.to_string(), value);
        }
        out
    }

    /// Checks that apply to every write: the title must be present.
    pub fn validate_title(self, input: &BTreeMap<String, Value>) -> Result<(), AppError> {
        let title = input.get("title").and_then(Value::as_str).unwrap_or("");
        if title.trim().is_empty() {
            return Err(AppError::validation(EMPTY_TITLE));
        }
        Ok(())
    }

    /// Checks that only apply when creating.
    pub fn validate_create(
        self,
        input: &BTreeMap<String, Value>,
        has_file: impl Fn(&str) -> bool,
    ) -> Result<(), AppError> {
        self.validate_title(input)?;
        if let Some(slot) = self.required_image() {
            if !has_file(slot) {
                return Err(AppError::validation(MISSING_PRIMARY_IMAGE));
            }
        }
        if self.requires_category() {
            let has_category = match input.get("category") {
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            };
            if !has_category {
                return Err(AppError::validation(MISSING_CATEGORY));
            }
        }
        Ok(())
    }

    /// Fresh entity with a random identifier and the whitelisted fields.
    pub fn new_entity(self, input: &BTreeMap<String, Value>) -> Entity {
        let mut entity = Entity::new(uuid::Uuid::new_v4().to_string());
        entity.fields = self.whitelist(input);
        entity
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

pub const EMPTY_TITLE: &str = "El título no puede estar vacío.";
pub const MISSING_PRIMARY_IMAGE: &str = "La imagen principal es obligatoria.";
pub const MISSING_CATEGORY: &str = "La categoría es obligatoria.";
pub const DUPLICATE_CATEGORY: &str = "Ya existe una categoría con ese nombre.";
pub const CATEGORY_NOT_FOUND: &str = "Categoría no encontrada.";
pub const CATEGORY_FIELDS_REQUIRED: &str = "El nombre y el color son obligatorios.";

/// Keep `YYYY-MM-DD` strings that name a real day; everything else is blanked.
pub fn normalize_date(raw: &str) -> String {
    let well_formed = raw.len() == 10
        && raw
            .char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !well_formed {
        return String::new();
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
