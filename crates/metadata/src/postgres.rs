//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{EDIT_COLUMNS, PackageEditRow, PackageRow};
use crate::repos::{EditRepo, PackageRepo};
use crate::store::{MetadataStore, expect_single_row};
use async_trait::async_trait;
use pkgedit_core::config::PgSslMode;
use pkgedit_core::{EditRequest, MAX_ATTEMPTS};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password arrive separately, e.g. via `PKGEDIT_METADATA__PASSWORD`.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one statement each
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PackageRepo for PostgresStore {
    async fn create_package(&self, package_id: &str, version: &str) -> MetadataResult<PackageRow> {
        let row = sqlx::query_as::<_, PackageRow>(
            "INSERT INTO packages (package_id, version, created_at) VALUES ($1, $2, $3) \
             RETURNING package_key, package_id, version, created_at",
        )
        .bind(package_id)
        .bind(version)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                MetadataError::AlreadyExists(format!("package {package_id} {version} already exists"))
            }
            other => MetadataError::Database(other),
        })?;
        Ok(row)
    }

    async fn get_package(
        &self,
        package_id: &str,
        version: &str,
    ) -> MetadataResult<Option<PackageRow>> {
        let row = sqlx::query_as::<_, PackageRow>(
            "SELECT package_key, package_id, version, created_at FROM packages \
             WHERE LOWER(package_id) = LOWER($1) AND LOWER(version) = LOWER($2)",
        )
        .bind(package_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl EditRepo for PostgresStore {
    async fn fetch_eligible_edits(&self) -> MetadataResult<Vec<EditRequest>> {
        let sql = format!(
            "SELECT {EDIT_COLUMNS} FROM package_edits e \
             JOIN packages p ON p.package_key = e.package_key \
             WHERE e.is_completed = FALSE AND e.tried_count < $1 \
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
             WHERE edit_key = $1 AND is_completed = FALSE AND tried_count < $2",
        )
        .bind(edit_key)
        .bind(MAX_ATTEMPTS)
        .execute(&self.pool)
        .await?;

        expect_single_row(edit_key, result.rows_affected())
    }

    async fn mark_completed(&self, edit_key: i64) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE package_edits SET is_completed = TRUE \
             WHERE edit_key = $1 AND is_completed = FALSE",
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
             WHERE e.is_completed = TRUE \
             AND LOWER(p.package_id) = LOWER($1) AND LOWER(p.version) = LOWER($2) \
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
            "SELECT COUNT(*) FROM package_edits WHERE is_completed = FALSE AND tried_count >= $1",
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
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
             WHERE e.edit_key = $1"
        );
        let row = sqlx::query_as::<_, PackageEditRow>(&sql)
            .bind(edit_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(EditRequest::from))
    }
}
