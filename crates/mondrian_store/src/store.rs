//! Store handle: URL parsing, connection, schema bootstrap.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::error::StoreError;

/// Parsed state store URL.
#[derive(Debug, Clone)]
pub enum StoreUrl {
    /// On-disk SQLite database
    Sqlite(PathBuf),
    /// In-memory SQLite database (tests, ephemeral runs)
    Memory,
    /// Recognized but not yet supported
    Postgres(String),
}

impl StoreUrl {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.trim();
            if path == ":memory:" {
                return Ok(Self::Memory);
            }
            if path.is_empty() {
                return Err(StoreError::UnsupportedUrl(raw.to_string()));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            return Ok(Self::Postgres(raw.to_string()));
        }
        Err(StoreError::UnsupportedUrl(raw.to_string()))
    }
}

/// Durable state: jobs, advisors, dimensional profiles, config.
///
/// Single-writer per job row; concurrent readers see consistent snapshots via
/// serialized transactions on the mutate path.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open a store from a URL string and run schema bootstrap.
    pub async fn open(raw: &str) -> Result<Self, StoreError> {
        match StoreUrl::parse(raw)? {
            StoreUrl::Sqlite(path) => {
                let options = SqliteConnectOptions::from_str(&format!(
                    "sqlite:{}",
                    path.display()
                ))
                .map_err(StoreError::Database)?
                .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await?;
                let store = Self { pool };
                store.init().await?;
                info!("Opened state store at {}", path.display());
                Ok(store)
            }
            StoreUrl::Memory => Self::open_in_memory().await,
            StoreUrl::Postgres(url) => Err(StoreError::UnsupportedUrl(format!(
                "Postgres state store not yet supported: {url}"
            ))),
        }
    }

    /// In-memory store for tests and ephemeral runs.
    ///
    /// A single connection keeps the database alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create tables if missing. Idempotent.
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs (status, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS advisors (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                advisor_id TEXT NOT NULL,
                image_ref TEXT NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (advisor_id, image_ref)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read a config value.
    pub async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    /// Write a config value, replacing any existing one.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_parsing() {
        assert!(matches!(
            StoreUrl::parse("sqlite:mondrian.db"),
            Ok(StoreUrl::Sqlite(_))
        ));
        assert!(matches!(
            StoreUrl::parse("sqlite::memory:"),
            Ok(StoreUrl::Memory)
        ));
        assert!(matches!(
            StoreUrl::parse("postgres://localhost/mondrian"),
            Ok(StoreUrl::Postgres(_))
        ));
        assert!(StoreUrl::parse("redis://localhost").is_err());
        assert!(StoreUrl::parse("sqlite:").is_err());
    }

    #[tokio::test]
    async fn config_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.get_config("threshold").await.unwrap(), None);
        store.set_config("threshold", "1.0").await.unwrap();
        store.set_config("threshold", "1.5").await.unwrap();
        assert_eq!(
            store.get_config("threshold").await.unwrap().as_deref(),
            Some("1.5")
        );
    }
}
