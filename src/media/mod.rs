mod bunny;
mod local;

use std::collections::HashSet;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use thiserror::Error;

use crate::resources::ResourceKind;
use crate::store::{ContentStore, StoreError};

pub use self::bunny::BunnyImageStore;
pub use self::local::LocalImageStore;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Image decode/encode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote storage rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Transcode task failed: {0}")]
    Task(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Where processed images end up. References returned here are what gets
/// stored in an entity's image slot.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Public reference for `{entity_id}/{slot}.jpg`.
    fn reference(&self, entity_id: &str, slot: &str) -> String;

    /// Accept a reference a client sent back for a slot, normalized for this
    /// store. `None` when it does not point into the image tree.
    fn accept_reference(&self, raw: &str) -> Option<String>;

    /// Store an encoded JPEG and return its reference.
    async fn put(&self, entity_id: &str, slot: &str, jpeg: Vec<u8>) -> Result<String, MediaError>;

    /// Remove the whole folder of an entity. Missing folders are not an error.
    async fn remove_folder(&self, entity_id: &str) -> Result<(), MediaError>;

    /// Names of every entity folder currently stored.
    async fn folders(&self) -> Result<Vec<String>, MediaError>;
}

/// Apply EXIF orientation and re-encode as baseline JPEG.
pub fn transcode_to_jpeg(input: &[u8], quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut decoder = ImageReader::new(Cursor::new(input))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&img.to_rgb8())?;
    Ok(out)
}

/// Transcode on the blocking pool and hand the result to the store.
pub async fn store_upload(
    images: &dyn ImageStore,
    entity_id: &str,
    slot: &str,
    upload: Bytes,
    quality: u8,
) -> Result<String, MediaError> {
    let jpeg = tokio::task::spawn_blocking(move || transcode_to_jpeg(&upload, quality))
        .await
        .map_err(|e| MediaError::Task(e.to_string()))??;
    images.put(entity_id, slot, jpeg).await
}

/// Remove a deleted entity's folder, unless some live image-bearing entity
/// still has that id.
pub async fn remove_entity_images(
    store: &dyn ContentStore,
    images: &dyn ImageStore,
    entity_id: &str,
) -> Result<bool, MediaError> {
    let live = store.live_ids(&ResourceKind::WITH_IMAGES).await?;
    if live.contains(entity_id) {
        return Ok(false);
    }
    images.remove_folder(entity_id).await?;
    Ok(true)
}

/// Remove every image folder not owned by a live project or news item.
/// Returns the folders removed. Individual removal failures are logged and
/// skipped.
pub async fn reconcile_orphans(
    store: &dyn ContentStore,
    images: &dyn ImageStore,
) -> Result<Vec<String>, MediaError> {
    let live: HashSet<String> = store.live_ids(&ResourceKind::WITH_IMAGES).await?;
    let mut removed = Vec::new();
    for folder in images.folders().await? {
        if live.contains(&folder) {
            continue;
        }
        match images.remove_folder(&folder).await {
            Ok(()) => {
                tracing::info!("Removed orphaned image folder {}", folder);
                removed.push(folder);
            }
            Err(e) => tracing::warn!("Could not remove orphaned image folder {}: {}", folder, e),
        }
    }
    Ok(removed)
}

/// Entity ids and slot names become path segments; keep them to a safe alphabet.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
pub(crate) mod testing {
    use image::{ImageFormat, Rgb, RgbImage};

    /// A small PNG with distinct width and height.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }
}
