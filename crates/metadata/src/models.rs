//! Database models mapping to the metadata schema.

use pkgedit_core::EditRequest;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Published package version record.
#[derive(Debug, Clone, FromRow)]
pub struct PackageRow {
    pub package_key: i64,
    pub package_id: String,
    pub version: String,
    pub created_at: OffsetDateTime,
}

/// Edit request record joined with its package's identity.
#[derive(Debug, Clone, FromRow)]
pub struct PackageEditRow {
    pub edit_key: i64,
    pub package_key: i64,
    pub package_id: String,
    pub version: String,
    pub edit_name: Option<String>,
    pub tried_count: i32,
    pub is_completed: bool,
    pub authors: Option<String>,
    pub copyright: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub license_url: Option<String>,
    pub project_url: Option<String>,
    pub release_notes: Option<String>,
    pub summary: Option<String>,
    pub tags: Option<String>,
    pub title: Option<String>,
    pub created_at: OffsetDateTime,
}

impl From<PackageEditRow> for EditRequest {
    fn from(row: PackageEditRow) -> Self {
        EditRequest {
            edit_key: row.edit_key,
            package_id: row.package_id,
            version: row.version,
            edit_name: row.edit_name,
            tried_count: row.tried_count,
            is_completed: row.is_completed,
            authors: row.authors,
            copyright: row.copyright,
            description: row.description,
            icon_url: row.icon_url,
            license_url: row.license_url,
            project_url: row.project_url,
            release_notes: row.release_notes,
            summary: row.summary,
            tags: row.tags,
            title: row.title,
        }
    }
}

/// Column list for `PackageEditRow` queries (`e` = package_edits, `p` = packages).
pub(crate) const EDIT_COLUMNS: &str = "e.edit_key, e.package_key, p.package_id, p.version, \
     e.edit_name, e.tried_count, e.is_completed, e.authors, e.copyright, e.description, \
     e.icon_url, e.license_url, e.project_url, e.release_notes, e.summary, e.tags, e.title, \
     e.created_at";
