//! Edit requests and manifest field mutations.

use crate::package::PackageIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A manifest field that an edit request may overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestField {
    Authors,
    Copyright,
    Description,
    IconUrl,
    LicenseUrl,
    ProjectUrl,
    ReleaseNotes,
    Summary,
    Tags,
    Title,
}

impl ManifestField {
    /// All editable fields, in the order mutations are produced for a request.
    pub const ALL: [ManifestField; 10] = [
        Self::Authors,
        Self::Copyright,
        Self::Description,
        Self::IconUrl,
        Self::LicenseUrl,
        Self::ProjectUrl,
        Self::ReleaseNotes,
        Self::Summary,
        Self::Tags,
        Self::Title,
    ];

    /// Element name of this field inside the manifest's `metadata` element.
    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Authors => "authors",
            Self::Copyright => "copyright",
            Self::Description => "description",
            Self::IconUrl => "iconUrl",
            Self::LicenseUrl => "licenseUrl",
            Self::ProjectUrl => "projectUrl",
            Self::ReleaseNotes => "releaseNotes",
            Self::Summary => "summary",
            Self::Tags => "tags",
            Self::Title => "title",
        }
    }

    /// Look up a field by its manifest element name.
    pub fn from_element_name(name: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.element_name().as_bytes() == name)
    }
}

impl fmt::Display for ManifestField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// Overwrite one manifest field with a new value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMutation {
    pub field: ManifestField,
    pub value: String,
}

impl FieldMutation {
    pub fn new(field: ManifestField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// A pending, user-submitted metadata edit for one package version.
///
/// Every optional field left as `None` means "leave unchanged".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    pub edit_key: i64,
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
}

impl EditRequest {
    /// Whether this request may still be picked up by a pipeline run.
    pub fn is_eligible(&self) -> bool {
        !self.is_completed && self.tried_count < crate::MAX_ATTEMPTS
    }

    /// Identity of the archive this request targets.
    pub fn package(&self) -> crate::Result<PackageIdentity> {
        PackageIdentity::new(&self.package_id, &self.version)
    }

    /// Current value requested for a field, if any.
    pub fn field(&self, field: ManifestField) -> Option<&str> {
        let value = match field {
            ManifestField::Authors => &self.authors,
            ManifestField::Copyright => &self.copyright,
            ManifestField::Description => &self.description,
            ManifestField::IconUrl => &self.icon_url,
            ManifestField::LicenseUrl => &self.license_url,
            ManifestField::ProjectUrl => &self.project_url,
            ManifestField::ReleaseNotes => &self.release_notes,
            ManifestField::Summary => &self.summary,
            ManifestField::Tags => &self.tags,
            ManifestField::Title => &self.title,
        };
        value.as_deref()
    }

    /// The non-null field mutations carried by this request.
    pub fn mutations(&self) -> Vec<FieldMutation> {
        ManifestField::ALL
            .into_iter()
            .filter_map(|field| {
                self.field(field)
                    .map(|value| FieldMutation::new(field, value))
            })
            .collect()
    }
}
