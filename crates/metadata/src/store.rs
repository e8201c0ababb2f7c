//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{EditRepo, PackageRepo};
use async_trait::async_trait;
use pkgedit_core::config::DEFAULT_SQLITE_BUSY_TIMEOUT_SECS;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: PackageRepo + EditRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, creating the database file and schema if needed.
    ///
    /// `busy_timeout_secs` bounds how long a statement waits on a locked
    /// database; `None` uses the default of five seconds.
    pub async fn new(
        path: impl AsRef<Path>,
        busy_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(
                busy_timeout_secs.unwrap_or(DEFAULT_SQLITE_BUSY_TIMEOUT_SECS),
            ));

        let pool = SqlitePoolOptions::new()
            // One writer at a time; avoids "database is locked" under concurrent tasks
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{EDIT_COLUMNS, PackageEditRow, PackageRow};
    use pkgedit_core::{EditRequest, MAX_ATTEMPTS};
    use time::OffsetDateTime;

    #[async_trait]
    impl PackageRepo for SqliteStore {
        async fn create_package(
            &self,
            package_id: &str,
            version: &str,
        ) -> MetadataResult<PackageRow> {
            if self.get_package(package_id, version).await?.is_some() {
                return Err(MetadataError::AlreadyExists(format!(
                    "package {package_id} {version} already exists"
                )));
            }

            let row = sqlx::query_as::<_, PackageRow>(
                "INSERT INTO packages (package_id, version, created_at) VALUES (?, ?, ?) \
                 RETURNING package_key, package_id, version, created_at",
            )
            .bind(package_id)
            .bind(version)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_package(
            &self,
            package_id: &str,
            version: &str,
        ) -> MetadataResult<Option<PackageRow>> {
            let row = sqlx::query_as::<_, PackageRow>(
                "SELECT package_key, package_id, version, created_at FROM packages \
                 WHERE package_id = ? COLLATE NOCASE AND version = ? COLLATE NOCASE",
            )
            .bind(package_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl EditRepo for SqliteStore {
        async fn fetch_eligible_edits(&self) -> MetadataResult<Vec<EditRequest>> {
            let sql = format!(
                "SELECT {EDIT_COLUMNS} FROM package_edits e \
                 JOIN packages p ON p.package_key = e.package_key \
                 WHERE e.is_completed = 0 AND e.tried_count < ? \
                 ORDER BY e.edit_key"
            );
            let rows = sqlx::query_as::<_, PackageEditRow>(&sql)
                .bind(MAX_ATTEMPTS)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(EditRequest::from).collect())
        }

        async fn mark_attempted(&self, edit_key: i64) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE package_edits SET tried_count = tried_count + 1 \
                 WHERE edit_key = ? AND is_completed = 0 AND tried_count < ?",
            )
            .bind(edit_key)
            .bind(MAX_ATTEMPTS)
            .execute(&self.pool)
            .await?;

            expect_single_row(edit_key, result.rows_affected())
        }

        async fn mark_completed(&self, edit_key: i64) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE package_edits SET is_completed = 1 WHERE edit_key = ? AND is_completed = 0",
            )
            .bind(edit_key)
            .execute(&self.pool)
            .await?;

            expect_single_row(edit_key, result.rows_affected())
        }

        async fn fetch_completed_edits(
            &self,
            package_id: &str,
            version: &str,
        ) -> MetadataResult<Vec<EditRequest>> {
            let sql = format!(
                "SELECT {EDIT_COLUMNS} FROM package_edits e \
                 JOIN packages p ON p.package_key = e.package_key \
                 WHERE e.is_completed = 1 \
                 AND p.package_id = ? COLLATE NOCASE AND p.version = ? COLLATE NOCASE \
                 ORDER BY e.edit_key"
            );
            let rows = sqlx::query_as::<_, PackageEditRow>(&sql)
                .bind(package_id)
                .bind(version)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(EditRequest::from).collect())
        }

        async fn count_abandoned_edits(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM package_edits WHERE is_completed = 0 AND tried_count >= ?",
            )
            .bind(MAX_ATTEMPTS)
            .fetch_one(&self.pool)
            .await?;
            Ok(count.max(0) as u64)
        }

        async fn create_edit(&self, package_key: i64, edit: &EditRequest) -> MetadataResult<i64> {
            let edit_key: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO package_edits (
                    package_key, edit_name, tried_count, is_completed,
                    authors, copyright, description, icon_url, license_url,
                    project_url, release_notes, summary, tags, title, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING edit_key
                "#,
            )
            .bind(package_key)
            .bind(&edit.edit_name)
            .bind(edit.tried_count)
            .bind(edit.is_completed)
            .bind(&edit.authors)
            .bind(&edit.copyright)
            .bind(&edit.description)
            .bind(&edit.icon_url)
            .bind(&edit.license_url)
            .bind(&edit.project_url)
            .bind(&edit.release_notes)
            .bind(&edit.summary)
            .bind(&edit.tags)
            .bind(&edit.title)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    MetadataError::NotFound(format!("package_key {package_key} not found"))
                }
                other => MetadataError::Database(other),
            })?;
            Ok(edit_key)
        }

        async fn get_edit(&self, edit_key: i64) -> MetadataResult<Option<EditRequest>> {
            let sql = format!(
                "SELECT {EDIT_COLUMNS} FROM package_edits e \
                 JOIN packages p ON p.package_key = e.package_key \
                 WHERE e.edit_key = ?"
            );
            let row = sqlx::query_as::<_, PackageEditRow>(&sql)
                .bind(edit_key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.map(EditRequest::from))
        }
    }
}

/// Map an UPDATE's affected row count onto the single-row transition contract.
pub(crate) fn expect_single_row(edit_key: i64, rows_affected: u64) -> MetadataResult<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(MetadataError::ConcurrentModification {
            edit_key,
            rows_affected,
        })
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Published package versions; identity is case-insensitive
CREATE TABLE IF NOT EXISTS packages (
    package_key INTEGER PRIMARY KEY AUTOINCREMENT,
    package_id TEXT NOT NULL,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_packages_identity
    ON packages(package_id COLLATE NOCASE, version COLLATE NOCASE);

-- Queued manifest edits; NULL field means "leave unchanged"
CREATE TABLE IF NOT EXISTS package_edits (
    edit_key INTEGER PRIMARY KEY AUTOINCREMENT,
    package_key INTEGER NOT NULL REFERENCES packages(package_key),
    edit_name TEXT,
    tried_count INTEGER NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0,
    authors TEXT,
    copyright TEXT,
    description TEXT,
    icon_url TEXT,
    license_url TEXT,
    project_url TEXT,
    release_notes TEXT,
    summary TEXT,
    tags TEXT,
    title TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_package_edits_pending
    ON package_edits(is_completed, tried_count);
CREATE INDEX IF NOT EXISTS idx_package_edits_package ON package_edits(package_key);
"#;
