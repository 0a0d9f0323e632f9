use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{event, Level};

pub const GAME_DB_FILE: &str = "ec4x.db";

/// Handle to one game's database. Pools are opened short-lived per game and
/// never shared across games; transactions scope every multi-statement
/// write.
#[derive(Clone)]
pub struct GameDb {
    pool: SqlitePool,
    path: PathBuf,
}

impl GameDb {
    /// Opens (creating if necessary) the database for a game directory and
    /// applies pending migrations.
    pub async fn open(game_dir: &Path) -> Result<Self> {
        let path = game_dir.join(GAME_DB_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("opening game database {}", path.display()))?;

        sqlx::migrate!().run(&pool).await.context("migrating game database")?;

        Ok(Self { pool, path })
    }

    /// In-memory database for tests. The single pinned connection keeps
    /// the database alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self {
            pool,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
        event!(Level::DEBUG, "closed game database {}", self.path.display());
    }
}

/// True when the directory holds a game database.
pub fn is_game_dir(dir: &Path) -> bool {
    dir.join(GAME_DB_FILE).is_file()
}
