use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gis_cms::auth::password::hash_password;
use gis_cms::config::{Cli, Command, Config};
use gis_cms::db::models::User;
use gis_cms::state::AppState;
use gis_cms::store::{JsonFileStore, SqliteStore, UserStore};
use gis_cms::{db, migrate, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::AddUser { username, password } => add_user(config, &username, &password).await,
        Command::Migrate => run_migration(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::from_config(config)?;

    // Startup sweep for folders left behind by interrupted deletes
    match state.sweep_orphans().await {
        Ok(removed) if !removed.is_empty() => {
            tracing::info!("Removed {} orphaned image folders", removed.len())
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Startup image reconciliation failed: {}", e),
    }

    let app = routes::app(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn add_user(config: Config, username: &str, password: &str) -> anyhow::Result<()> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        anyhow::bail!("username and password must not be empty");
    }
    let state = AppState::from_config(config)?;
    let user = User {
        username: username.to_string(),
        password_hash: hash_password(password)?,
        token: None,
    };
    state.users.upsert_user(&user).await?;
    tracing::info!("Saved user {}", username);
    Ok(())
}

async fn run_migration(config: Config) -> anyhow::Result<()> {
    let source = JsonFileStore::new(config.documents_path());
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;
    let target = SqliteStore::new(pool);

    let report = migrate::json_to_sqlite(&source, &target).await?;
    println!("{}", report);
    Ok(())
}
