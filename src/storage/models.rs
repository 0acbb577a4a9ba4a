use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub root_path: PathBuf,
    pub scan_subdirs: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Asset {
    pub id: i64,
    pub library_id: i64,
    pub partial_hash: String,
    pub file_size: i64,
    pub current_path: Option<PathBuf>,
    pub original_filename: String,
    pub file_extension: Option<String>,
    pub rating: u8,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub is_missing: bool,
    /// Resolved `namespace:name` labels, ordered by namespace then name.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub namespace: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// `namespace:name`, or just `name` for the default namespace.
    pub fn full_name(&self) -> String {
        tag_label(&self.namespace, &self.name)
    }
}

pub(crate) fn tag_label(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", namespace, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Sibling,
    Parent,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Sibling => "sibling",
            RelationshipKind::Parent => "parent",
        }
    }

    pub fn parse(s: &str) -> Option<RelationshipKind> {
        match s {
            "sibling" => Some(RelationshipKind::Sibling),
            "parent" => Some(RelationshipKind::Parent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub library_id: i64,
    pub partial_hash: String,
    pub file_size: i64,
    pub current_path: PathBuf,
    /// Defaults to the file name of `current_path`.
    pub original_filename: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct AssetUpdate {
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub current_path: Option<PathBuf>,
    pub is_missing: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct TagUpdate {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct AssetFilter {
    /// Assets must carry every listed tag.
    pub tag_ids: Vec<i64>,
    pub rating_min: Option<u8>,
    pub include_missing: bool,
    pub limit: Option<i64>,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub total_assets: i64,
    pub missing_assets: i64,
    pub tagged_assets: i64,
}
