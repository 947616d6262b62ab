use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::auth::TokenSigner;
use crate::config::{Config, ImageBackend, StoreBackend};
use crate::db;
use crate::media::{self, BunnyImageStore, ImageStore, LocalImageStore, MediaError};
use crate::store::{ContentStore, JsonFileStore, SqliteStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContentStore>,
    pub users: Arc<dyn UserStore>,
    pub images: Arc<dyn ImageStore>,
    pub tokens: Arc<TokenSigner>,
    pub config: Config,
    /// Shared by requests writing into image folders, exclusive for the
    /// orphan sweep. A folder uploaded under a read guard is never swept
    /// before its entity is stored.
    uploads: Arc<RwLock<()>>,
}

impl AppState {
    /// Open the configured backends. Directories are created as needed.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let (store, users): (Arc<dyn ContentStore>, Arc<dyn UserStore>) =
            match config.storage.backend {
                StoreBackend::Json => {
                    let dir = config.documents_path();
                    std::fs::create_dir_all(&dir)?;
                    tracing::info!("Using JSON document store at {}", dir.display());
                    let store = Arc::new(JsonFileStore::new(dir));
                    let users: Arc<dyn UserStore> = store.clone();
                    (store as Arc<dyn ContentStore>, users)
                }
                StoreBackend::Sqlite => {
                    let path = config.db_path();
                    tracing::info!("Using SQLite store at {}", path.display());
                    let pool = db::create_pool(&path)?;
                    db::run_migrations(&pool)?;
                    let store = Arc::new(SqliteStore::new(pool));
                    let users: Arc<dyn UserStore> = store.clone();
                    (store as Arc<dyn ContentStore>, users)
                }
            };

        let images: Arc<dyn ImageStore> = match config.images.backend {
            ImageBackend::Local => {
                let root = config.images_path();
                std::fs::create_dir_all(&root)?;
                Arc::new(LocalImageStore::new(root))
            }
            ImageBackend::Bunny => {
                if config.images.bunny.access_key.is_empty() {
                    anyhow::bail!("images.bunny.access_key must be set for the bunny backend");
                }
                Arc::new(BunnyImageStore::new(config.images.bunny.clone()))
            }
        };

        let tokens = Arc::new(TokenSigner::load_or_create(&config.data_dir, &config.auth)?);

        Ok(Self {
            store,
            users,
            images,
            tokens,
            config,
            uploads: Arc::new(RwLock::new(())),
        })
    }

    /// Hold this from the first image upload until the entity is stored.
    pub async fn hold_uploads(&self) -> OwnedRwLockReadGuard<()> {
        self.uploads.clone().read_owned().await
    }

    /// Remove image folders no live entity owns, once no upload is in flight.
    pub async fn sweep_orphans(&self) -> Result<Vec<String>, MediaError> {
        let _exclusive = self.uploads.write().await;
        media::reconcile_orphans(self.store.as_ref(), self.images.as_ref()).await
    }
}
