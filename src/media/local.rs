use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ImageStore, MediaError};

/// Images on local disk, served by the router under `/images`.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    fn reference(&self, entity_id: &str, slot: &str) -> String {
        format!("/images/{}/{}.jpg", entity_id, slot)
    }

    fn accept_reference(&self, raw: &str) -> Option<String> {
        raw.contains("/images/").then(|| raw.to_string())
    }

    async fn put(&self, entity_id: &str, slot: &str, jpeg: Vec<u8>) -> Result<String, MediaError> {
        let dir = self.root.join(entity_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(format!("{}.jpg", slot)), jpeg).await?;
        Ok(self.reference(entity_id, slot))
    }

    async fn remove_folder(&self, entity_id: &str) -> Result<(), MediaError> {
        match tokio::fs::remove_dir_all(self.root.join(entity_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn folders(&self) -> Result<Vec<String>, MediaError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut folders = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    folders.push(name.to_string());
                }
            }
        }
        Ok(folders)
    }
}
