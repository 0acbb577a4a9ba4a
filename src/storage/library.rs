use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use super::models::{Asset, AssetFilter, AssetUpdate, Library, LibraryStats, NewAsset, tag_label};
use super::sqlite::{SqliteStorage, constraint_error, not_found};
use super::{AssetOps, LibraryRegistry};
use crate::errors::{AssetError, Result};

const LIBRARY_COLUMNS: &str = "id, name, root_path, scan_subdirs, created_at, updated_at";

const ASSET_COLUMNS: &str = "id, library_id, partial_hash, file_size, current_path, original_filename,
     file_extension, rating, notes, created_at, updated_at, last_seen_at, is_missing";

pub const MAX_RATING: u8 = 5;

fn row_to_library(row: &Row) -> rusqlite::Result<Library> {
    let root: String = row.get(2)?;
    Ok(Library {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: PathBuf::from(root),
        scan_subdirs: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_asset(row: &Row) -> rusqlite::Result<Asset> {
    let path: Option<String> = row.get(4)?;
    Ok(Asset {
        id: row.get(0)?,
        library_id: row.get(1)?,
        partial_hash: row.get(2)?,
        file_size: row.get(3)?,
        current_path: path.map(PathBuf::from),
        original_filename: row.get(5)?,
        file_extension: row.get(6)?,
        rating: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        last_seen_at: row.get(11)?,
        is_missing: row.get(12)?,
        tags: Vec::new(),
    })
}

// Stored paths must round-trip exactly.
fn path_text(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        AssetError::InvalidPath(format!("path is not valid UTF-8: {}", path.display()))
    })
}

fn check_root(root_path: &Path) -> Result<()> {
    if !root_path.exists() {
        return Err(AssetError::InvalidPath(format!(
            "path does not exist: {}",
            root_path.display()
        )));
    }
    if !root_path.is_dir() {
        return Err(AssetError::InvalidPath(format!(
            "path is not a directory: {}",
            root_path.display()
        )));
    }
    Ok(())
}

fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

impl SqliteStorage {
    fn asset_tag_labels(&self, asset_id: i64) -> Result<Vec<String>> {
        self.fetch_all(
            "SELECT t.namespace, t.name FROM tags t
             JOIN asset_tags at ON t.id = at.tag_id
             WHERE at.asset_id = ?
             ORDER BY t.namespace, t.name",
            params![asset_id],
            |row| {
                let namespace: String = row.get(0)?;
                let name: String = row.get(1)?;
                Ok(tag_label(&namespace, &name))
            },
        )
    }

    fn with_tags(&self, mut asset: Asset) -> Result<Asset> {
        asset.tags = self.asset_tag_labels(asset.id)?;
        Ok(asset)
    }

    fn find_asset(&self, where_clause: &str, params: impl rusqlite::Params) -> Result<Option<Asset>> {
        let sql = format!("SELECT {} FROM assets WHERE {}", ASSET_COLUMNS, where_clause);
        match self.fetch_one(&sql, params, row_to_asset)? {
            Some(asset) => Ok(Some(self.with_tags(asset)?)),
            None => Ok(None),
        }
    }
}

impl LibraryRegistry for SqliteStorage {
    fn create_library(&self, name: &str, root_path: &Path, scan_subdirs: bool) -> Result<Library> {
        check_root(root_path)?;
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO libraries (name, root_path, scan_subdirs, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![name, path_text(root_path)?, scan_subdirs, now, now],
            )
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("library named \"{}\" already exists", name),
                    || format!("library \"{}\"", name),
                )
            })?;
        let id = self.conn.last_insert_rowid();
        info!("created library \"{}\" at {}", name, root_path.display());
        self.get_library(id)
    }

    fn get_library(&self, id: i64) -> Result<Library> {
        let sql = format!("SELECT {} FROM libraries WHERE id = ?", LIBRARY_COLUMNS);
        self.conn
            .query_row(&sql, params![id], row_to_library)
            .map_err(|e| not_found(e, || format!("Library with id {} not found", id)))
    }

    fn get_library_by_name(&self, name: &str) -> Result<Option<Library>> {
        let sql = format!("SELECT {} FROM libraries WHERE name = ?", LIBRARY_COLUMNS);
        self.fetch_one(&sql, params![name], row_to_library)
    }

    fn get_all_libraries(&self) -> Result<Vec<Library>> {
        let sql = format!("SELECT {} FROM libraries ORDER BY name", LIBRARY_COLUMNS);
        self.fetch_all(&sql, [], row_to_library)
    }

    fn update_library(&self, library: &Library) -> Result<Library> {
        check_root(&library.root_path)?;
        let changes = self
            .conn
            .execute(
                "UPDATE libraries SET name = ?, root_path = ?, scan_subdirs = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    library.name,
                    path_text(&library.root_path)?,
                    library.scan_subdirs,
                    Utc::now(),
                    library.id,
                ],
            )
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("library named \"{}\" already exists", library.name),
                    || format!("Library with id {} not found", library.id),
                )
            })?;
        if changes == 0 {
            return Err(AssetError::NotFound(format!(
                "Library with id {} not found",
                library.id
            )));
        }
        self.get_library(library.id)
    }

    fn delete_library(&self, id: i64) -> Result<bool> {
        let changes = self.execute("DELETE FROM libraries WHERE id = ?", params![id])?;
        if changes > 0 {
            info!("deleted library {} and its assets", id);
        }
        Ok(changes > 0)
    }

    fn get_library_stats(&self, id: i64) -> Result<LibraryStats> {
        self.get_library(id)?;
        self.conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COUNT(CASE WHEN is_missing = 1 THEN 1 END),
                    (SELECT COUNT(DISTINCT at.asset_id) FROM asset_tags at
                     JOIN assets a ON a.id = at.asset_id
                     WHERE a.library_id = ?1)
                 FROM assets WHERE library_id = ?1",
                params![id],
                |row| {
                    Ok(LibraryStats {
                        total_assets: row.get(0)?,
                        missing_assets: row.get(1)?,
                        tagged_assets: row.get(2)?,
                    })
                },
            )
            .map_err(AssetError::Storage)
    }
}

impl AssetOps for SqliteStorage {
    fn upsert_asset(&self, asset: NewAsset) -> Result<(Asset, bool)> {
        let current_path = path_text(&asset.current_path)?;
        let filename = asset
            .original_filename
            .clone()
            .or_else(|| {
                asset
                    .current_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| current_path.to_string());
        let extension = file_extension(&asset.current_path);
        let now = Utc::now();

        let tx = self.write_tx()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM assets WHERE library_id = ? AND partial_hash = ? AND file_size = ?",
                params![asset.library_id, asset.partial_hash, asset.file_size],
                |row| row.get(0),
            )
            .optional()?;
        let id: i64 = tx
            .query_row(
                "INSERT INTO assets (
                    library_id, partial_hash, file_size, current_path, original_filename,
                    file_extension, created_at, updated_at, last_seen_at, is_missing
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7, 0)
                 ON CONFLICT(library_id, partial_hash, file_size) DO UPDATE SET
                    current_path = excluded.current_path,
                    last_seen_at = excluded.last_seen_at,
                    is_missing = 0
                 RETURNING id",
                params![
                    asset.library_id,
                    asset.partial_hash,
                    asset.file_size,
                    current_path,
                    filename,
                    extension,
                    now,
                ],
                |row| row.get(0),
            )
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("asset {} conflicts", asset.partial_hash),
                    || format!("Library with id {} not found", asset.library_id),
                )
            })?;
        tx.commit()?;

        let inserted = existing.is_none();
        debug!(
            "{} asset {} at {}",
            if inserted { "added" } else { "refreshed" },
            id,
            asset.current_path.display()
        );
        Ok((self.get_asset(id)?, inserted))
    }

    fn get_asset(&self, id: i64) -> Result<Asset> {
        self.find_asset("id = ?", params![id])?
            .ok_or_else(|| AssetError::NotFound(format!("Asset with id {} not found", id)))
    }

    fn get_asset_by_hash(&self, library_id: i64, hash: &str, size: i64) -> Result<Option<Asset>> {
        self.find_asset(
            "library_id = ? AND partial_hash = ? AND file_size = ?",
            params![library_id, hash, size],
        )
    }

    fn get_asset_by_path(&self, path: &Path) -> Result<Option<Asset>> {
        let Some(text) = path.to_str() else {
            return Ok(None);
        };
        self.find_asset("current_path = ? ORDER BY id LIMIT 1", params![text])
    }

    fn get_library_assets(&self, library_id: i64, filter: &AssetFilter) -> Result<Vec<Asset>> {
        let mut conditions = vec!["library_id = ?".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(library_id)];

        if !filter.include_missing {
            conditions.push("is_missing = 0".to_string());
        }
        if let Some(min) = filter.rating_min {
            conditions.push("rating >= ?".to_string());
            param_values.push(Box::new(min));
        }

        let mut tag_ids = filter.tag_ids.clone();
        tag_ids.sort_unstable();
        tag_ids.dedup();
        if !tag_ids.is_empty() {
            let placeholders = vec!["?"; tag_ids.len()].join(", ");
            conditions.push(format!(
                "id IN (
                    SELECT asset_id FROM asset_tags
                    WHERE tag_id IN ({})
                    GROUP BY asset_id
                    HAVING COUNT(DISTINCT tag_id) = ?
                )",
                placeholders
            ));
            let wanted = tag_ids.len() as i64;
            for tag_id in tag_ids {
                param_values.push(Box::new(tag_id));
            }
            param_values.push(Box::new(wanted));
        }

        let mut sql = format!(
            "SELECT {} FROM assets WHERE {} ORDER BY original_filename, id",
            ASSET_COLUMNS,
            conditions.join(" AND ")
        );
        if filter.limit.is_some() || filter.offset > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            param_values.push(Box::new(filter.limit.unwrap_or(-1)));
            param_values.push(Box::new(filter.offset));
        }

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let assets = self.fetch_all(&sql, param_refs.as_slice(), row_to_asset)?;
        assets.into_iter().map(|a| self.with_tags(a)).collect()
    }

    fn update_asset(&self, id: i64, update: AssetUpdate) -> Result<()> {
        let mut sets = vec!["updated_at = ?".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(Utc::now())];

        if let Some(rating) = update.rating {
            if rating > MAX_RATING {
                return Err(AssetError::InvalidInput(format!(
                    "rating must be between 0 and {}, got {}",
                    MAX_RATING, rating
                )));
            }
            sets.push("rating = ?".to_string());
            param_values.push(Box::new(rating));
        }
        if let Some(notes) = update.notes {
            sets.push("notes = ?".to_string());
            param_values.push(Box::new(notes));
        }
        if let Some(path) = update.current_path {
            sets.push("current_path = ?".to_string());
            param_values.push(Box::new(path_text(&path)?.to_string()));
        }
        if let Some(missing) = update.is_missing {
            sets.push("is_missing = ?".to_string());
            param_values.push(Box::new(missing));
        }
        param_values.push(Box::new(id));

        let sql = format!("UPDATE assets SET {} WHERE id = ?", sets.join(", "));
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let changes = self.conn.execute(&sql, param_refs.as_slice())?;
        if changes == 0 {
            return Err(AssetError::NotFound(format!("Asset with id {} not found", id)));
        }
        Ok(())
    }

    fn delete_asset(&self, id: i64) -> Result<bool> {
        let changes = self.execute("DELETE FROM assets WHERE id = ?", params![id])?;
        Ok(changes > 0)
    }

    fn mark_assets_missing(&self, library_id: i64) -> Result<i64> {
        let changes = self.execute(
            "UPDATE assets SET is_missing = 1 WHERE library_id = ?",
            params![library_id],
        )?;
        Ok(changes as i64)
    }

    fn cleanup_missing_assets(&self, library_id: i64) -> Result<i64> {
        let changes = self.execute(
            "DELETE FROM assets WHERE library_id = ? AND is_missing = 1",
            params![library_id],
        )?;
        info!("purged {} missing assets from library {}", changes, library_id);
        Ok(changes as i64)
    }

    fn add_tag_to_asset(&self, asset_id: i64, tag_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO asset_tags (asset_id, tag_id, created_at) VALUES (?, ?, ?)",
                params![asset_id, tag_id, Utc::now()],
            )
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("asset {} already has tag {}", asset_id, tag_id),
                    || format!("asset {} or tag {} does not exist", asset_id, tag_id),
                )
            })?;
        Ok(())
    }

    fn remove_tag_from_asset(&self, asset_id: i64, tag_id: i64) -> Result<()> {
        self.execute(
            "DELETE FROM asset_tags WHERE asset_id = ? AND tag_id = ?",
            params![asset_id, tag_id],
        )?;
        Ok(())
    }

    fn get_asset_tag_ids(&self, asset_id: i64) -> Result<Vec<i64>> {
        self.fetch_all(
            "SELECT tag_id FROM asset_tags WHERE asset_id = ? ORDER BY tag_id",
            params![asset_id],
            |row| row.get(0),
        )
    }
}
