// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::config::DatabaseConfig;

/// Open a transaction that holds the write lock from its first statement.
///
/// A deferred `BEGIN` that reads before writing has to upgrade its lock
/// later, and SQLite fails that upgrade with `SQLITE_BUSY` without waiting on
/// `busy_timeout`. `BEGIN IMMEDIATE` queues on the timeout instead.
pub async fn begin_write(pool: &SqlitePool) -> sqlx::Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::from_config(&DatabaseConfig {
            url: database_url.to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let database_url = config.url.as_str();

        // Create database file directory if it doesn't exist
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if !db_path.starts_with(":memory:") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        // WAL keeps readers off the writer's lock; writers queue on busy_timeout.
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_comics_sql = r#"
            CREATE TABLE IF NOT EXISTS comics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin_id TEXT NOT NULL UNIQUE,
                origin_url TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                chapter_count INTEGER NOT NULL DEFAULT 0,
                crawl_status TEXT NOT NULL DEFAULT 'READY_FOR_CRAWL'
                    CHECK (crawl_status IN ('READY_FOR_CRAWL', 'ON_CRAWL', 'DONE')),
                thumb_image_id INTEGER REFERENCES images (id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#;

        let create_chapters_sql = r#"
            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                comic_id INTEGER NOT NULL REFERENCES comics (id) ON DELETE CASCADE,
                chapter_number TEXT NOT NULL,
                title TEXT NOT NULL,
                source_url TEXT NOT NULL,
                position INTEGER NOT NULL,
                crawl_status TEXT NOT NULL DEFAULT 'READY_FOR_CRAWL'
                    CHECK (crawl_status IN ('READY_FOR_CRAWL', 'ON_CRAWL', 'DONE')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#;

        // An image hangs off exactly one parent: a comic (thumbnail) or a chapter (page).
        let create_images_sql = r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                origin_urls TEXT NOT NULL,
                position INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('THUMB', 'PAGE')),
                comic_id INTEGER REFERENCES comics (id) ON DELETE CASCADE,
                chapter_id INTEGER REFERENCES chapters (id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                CHECK ((comic_id IS NULL) <> (chapter_id IS NULL)),
                CHECK ((kind = 'THUMB') = (comic_id IS NOT NULL))
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_comics_origin_url ON comics (origin_url);
            CREATE INDEX IF NOT EXISTS idx_chapters_comic_position ON chapters (comic_id, position);
            CREATE INDEX IF NOT EXISTS idx_chapters_crawl_status ON chapters (crawl_status);
            CREATE INDEX IF NOT EXISTS idx_images_chapter_id ON images (chapter_id, position);
            CREATE INDEX IF NOT EXISTS idx_images_comic_id ON images (comic_id);
        "#;

        sqlx::query(create_comics_sql).execute(&self.pool).await?;
        sqlx::query(create_chapters_sql).execute(&self.pool).await?;
        sqlx::query(create_images_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url).await?;

        assert!(!db.pool().is_closed());
        assert!(db_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migration.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;
        // Idempotent
        db.migrate().await?;

        for table in ["comics", "chapters", "images"] {
            let result = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table)
                .fetch_optional(db.pool())
                .await?;
            assert!(result.is_some(), "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn image_rows_need_exactly_one_parent() -> Result<()> {
        let temp_dir = tempdir()?;
        let database_url = format!("sqlite:{}", temp_dir.path().join("owners.db").display());
        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;

        let orphan = sqlx::query(
            "INSERT INTO images (file_name, origin_urls, position, kind, created_at) VALUES ('a.jpg', '[]', 0, 'PAGE', '2024-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await;

        assert!(orphan.is_err());
        Ok(())
    }
}
