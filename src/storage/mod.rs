pub mod library;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod tags;

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::Result;
use models::{
    Asset, AssetFilter, AssetUpdate, Library, LibraryStats, NewAsset, RelationshipKind, Tag,
    TagUpdate,
};

pub trait LibraryRegistry {
    fn create_library(&self, name: &str, root_path: &Path, scan_subdirs: bool) -> Result<Library>;
    fn get_library(&self, id: i64) -> Result<Library>;
    fn get_library_by_name(&self, name: &str) -> Result<Option<Library>>;
    fn get_all_libraries(&self) -> Result<Vec<Library>>;
    fn update_library(&self, library: &Library) -> Result<Library>;
    fn delete_library(&self, id: i64) -> Result<bool>;
    fn get_library_stats(&self, id: i64) -> Result<LibraryStats>;
}

pub trait AssetOps {
    /// Insert or refresh by (library, hash, size). Returns the row and whether it was new.
    fn upsert_asset(&self, asset: NewAsset) -> Result<(Asset, bool)>;
    fn add_asset(&self, asset: NewAsset) -> Result<Asset> {
        self.upsert_asset(asset).map(|(asset, _)| asset)
    }
    fn get_asset(&self, id: i64) -> Result<Asset>;
    fn get_asset_by_hash(&self, library_id: i64, hash: &str, size: i64) -> Result<Option<Asset>>;
    fn get_asset_by_path(&self, path: &Path) -> Result<Option<Asset>>;
    fn get_library_assets(&self, library_id: i64, filter: &AssetFilter) -> Result<Vec<Asset>>;
    fn update_asset(&self, id: i64, update: AssetUpdate) -> Result<()>;
    fn delete_asset(&self, id: i64) -> Result<bool>;
    fn mark_assets_missing(&self, library_id: i64) -> Result<i64>;
    fn cleanup_missing_assets(&self, library_id: i64) -> Result<i64>;
    fn add_tag_to_asset(&self, asset_id: i64, tag_id: i64) -> Result<()>;
    fn remove_tag_from_asset(&self, asset_id: i64, tag_id: i64) -> Result<()>;
    fn get_asset_tag_ids(&self, asset_id: i64) -> Result<Vec<i64>>;
}

pub trait TagOps {
    fn create_tag(&self, name: &str, namespace: &str, color: Option<&str>) -> Result<Tag>;
    fn get_or_create_tag(&self, name: &str, namespace: &str, color: Option<&str>) -> Result<Tag>;
    fn get_or_create_from_string(&self, tag: &str) -> Result<Tag>;
    fn get_tag(&self, id: i64) -> Result<Tag>;
    fn get_tags(&self, ids: &[i64]) -> Result<Vec<Tag>>;
    fn get_tag_by_name(&self, name: &str, namespace: &str) -> Result<Option<Tag>>;
    fn get_all_tags(&self) -> Result<Vec<Tag>>;
    fn get_tags_by_namespace(&self, namespace: &str) -> Result<Vec<Tag>>;
    fn get_namespaces(&self) -> Result<Vec<String>>;
    fn search_tags(&self, query: &str, limit: i64) -> Result<Vec<Tag>>;
    fn update_tag(&self, id: i64, update: TagUpdate) -> Result<Tag>;
    fn delete_tag(&self, id: i64) -> Result<bool>;
    fn get_tag_usage_count(&self, id: i64) -> Result<i64>;

    fn add_sibling(&self, tag_id: i64, sibling_id: i64) -> Result<()>;
    fn add_parent(&self, child_id: i64, parent_id: i64) -> Result<()>;
    fn remove_relationship(&self, tag_id: i64, related_id: i64, kind: RelationshipKind) -> Result<bool>;
    fn get_siblings(&self, tag_id: i64) -> Result<Vec<Tag>>;
    fn get_parents(&self, tag_id: i64) -> Result<Vec<Tag>>;
    fn get_children(&self, tag_id: i64) -> Result<Vec<Tag>>;
    fn get_all_parents(&self, tag_id: i64) -> Result<Vec<Tag>>;
    fn resolve_canonical_tag(&self, tag_id: i64) -> Result<Tag>;

    fn get_library_tags(&self, library_id: i64) -> Result<Vec<Tag>>;
    fn get_library_tag_counts(&self, library_id: i64) -> Result<BTreeMap<i64, i64>>;
}
