use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gis-cms", about = "Content backend for projects, news and job postings")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create a user or reset an existing user's password
    AddUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Copy the JSON documents into the SQLite database, replacing its contents
    Migrate,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub images: ImagesConfig,
    pub auth: AuthConfig,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_mb: usize,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    /// Directory holding the JSON documents.
    pub path: Option<PathBuf>,
    pub images_path: Option<PathBuf>,
    /// Reference stored for image slots that hold no image.
    pub placeholder: String,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    #[default]
    Local,
    Bunny,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ImagesConfig {
    pub backend: ImageBackend,
    pub jpeg_quality: u8,
    pub bunny: BunnyConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BunnyConfig {
    pub storage_api: String,
    pub access_key: String,
    pub cdn_zone_url: String,
    pub cdn_api_key: Option<String>,
    pub purge_api: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub session_hours: u64,
    /// Hex-encoded signing key. Generated and persisted in the data dir when unset.
    pub token_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            cors_origins: vec!["http://localhost:3000".to_string()],
            max_upload_mb: 20,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: None,
            images_path: None,
            placeholder: "/public/placeholder.svg".to_string(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            backend: ImageBackend::Local,
            jpeg_quality: 90,
            bunny: BunnyConfig::default(),
        }
    }
}

impl Default for BunnyConfig {
    fn default() -> Self {
        Self {
            storage_api: "https://br.storage.bunnycdn.com/gis-images".to_string(),
            access_key: String::new(),
            cdn_zone_url: "https://br.b-cdn.net".to_string(),
            cdn_api_key: None,
            purge_api: "https://api.bunny.net/purge".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_hours: 720,
            token_secret: None,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        config.resolve_paths(data_dir);
        Ok(config)
    }

    /// Fill unset paths with their defaults and anchor relative ones in `data_dir`.
    pub fn resolve_paths(&mut self, data_dir: PathBuf) {
        let anchor = |path: Option<PathBuf>, default: &str| -> PathBuf {
            match path {
                Some(p) if p.is_absolute() => p,
                Some(p) => data_dir.join(p),
                None => data_dir.join(default),
            }
        };
        self.database.path = Some(anchor(self.database.path.take(), "cms.db"));
        self.storage.path = Some(anchor(self.storage.path.take(), "."));
        self.storage.images_path = Some(anchor(self.storage.images_path.take(), "images"));
        self.data_dir = data_dir;
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".gis-cms")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cms.db"))
    }

    pub fn documents_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.clone())
    }

    pub fn images_path(&self) -> PathBuf {
        self.storage
            .images_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("images"))
    }

    /// File served when a news image is missing.
    pub fn placeholder_file(&self) -> PathBuf {
        self.data_dir
            .join(self.storage.placeholder.trim_start_matches('/'))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir,
            command: None,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.storage.backend, StoreBackend::Json);
        assert_eq!(config.storage.placeholder, "/public/placeholder.svg");
        assert_eq!(config.images.backend, ImageBackend::Local);
        assert_eq!(config.images.jpeg_quality, 90);
        assert_eq!(config.auth.session_hours, 720);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(Some(PathBuf::from("/tmp/test-cms")));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-cms"));
    }

    #[test]
    fn data_dir_defaults_to_home_dot_dir() {
        assert!(Config::data_dir(&cli(None)).ends_with(".gis-cms"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.db_path(), tmp.path().join("cms.db"));
        assert_eq!(config.images_path(), tmp.path().join("images"));
        assert_eq!(
            config.placeholder_file(),
            tmp.path().join("public/placeholder.svg")
        );
    }

    #[test]
    fn load_applies_cli_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.host = Some("127.0.0.1".to_string());
        cli.port = Some(8080);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
port = 9000
cors_origins = ["https://gis-web.vercel.app"]

[storage]
backend = "sqlite"
images_path = "media"

[images]
backend = "bunny"

[images.bunny]
access_key = "secret"

[auth]
session_hours = 24
"#,
        )
        .unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_origins, vec!["https://gis-web.vercel.app"]);
        assert_eq!(config.storage.backend, StoreBackend::Sqlite);
        assert_eq!(config.images_path(), tmp.path().join("media"));
        assert_eq!(config.images.backend, ImageBackend::Bunny);
        assert_eq!(config.images.bunny.access_key, "secret");
        assert_eq!(config.images.bunny.cdn_zone_url, "https://br.b-cdn.net");
        assert_eq!(config.auth.session_hours, 24);
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[server]\nhost = \"192.168.1.1\"\nport = 9000\n").unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        cli.host = Some("10.0.0.1".to_string());
        cli.port = Some(4100);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4100);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let mut config = Config::default();
        config.database.path = Some(PathBuf::from("/var/lib/cms/cms.db"));
        config.resolve_paths(PathBuf::from("/data"));
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/cms/cms.db"));
        assert_eq!(config.documents_path(), PathBuf::from("/data/."));
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::parse_from([
            "gis-cms",
            "--data-dir",
            "/tmp/x",
            "add-user",
            "--username",
            "admin",
            "--password",
            "pw",
        ]);
        assert_eq!(
            cli.command,
            Some(Command::AddUser {
                username: "admin".into(),
                password: "pw".into()
            })
        );
        assert_eq!(Cli::parse_from(["gis-cms"]).command, None);
    }
}
