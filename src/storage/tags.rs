use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use rusqlite::{Row, params};
use tracing::debug;

use super::models::{RelationshipKind, Tag, TagUpdate, tag_label};
use super::sqlite::{SqliteStorage, constraint_error, not_found};
use super::TagOps;
use crate::errors::{AssetError, Result};

const TAG_COLUMNS: &str = "t.id, t.name, t.namespace, t.color, t.created_at";

fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        namespace: row.get(2)?,
        color: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Splits `"namespace:name"` at the first colon. A string without a colon is a
/// name in the default (empty) namespace. Both parts are trimmed and lowercased.
pub fn parse_tag_string(tag: &str) -> (String, String) {
    let tag = normalize(tag);
    match tag.split_once(':') {
        Some((namespace, name)) => (namespace.trim().to_string(), name.trim().to_string()),
        None => (String::new(), tag),
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AssetError::InvalidInput("tag name must not be empty".to_string()));
    }
    Ok(())
}

impl SqliteStorage {
    fn related_tags(&self, sql_join: &str, tag_id: i64, kind: RelationshipKind) -> Result<Vec<Tag>> {
        let sql = format!(
            "SELECT {} FROM tags t
             JOIN tag_relationships tr ON {}
             WHERE tr.relationship_type = ?2
             ORDER BY t.namespace, t.name",
            TAG_COLUMNS, sql_join
        );
        self.fetch_all(&sql, params![tag_id, kind.as_str()], row_to_tag)
    }

    fn insert_relationship(&self, tag_id: i64, related_id: i64, kind: RelationshipKind) -> Result<()> {
        if tag_id == related_id {
            return Err(AssetError::InvalidInput(format!(
                "tag {} cannot be its own {}",
                tag_id,
                kind.as_str()
            )));
        }
        let now = Utc::now();
        let tx = self.write_tx()?;
        let mut pairs = vec![(tag_id, related_id)];
        if kind == RelationshipKind::Sibling {
            pairs.push((related_id, tag_id));
        }
        for (from, to) in pairs {
            tx.execute(
                "INSERT OR IGNORE INTO tag_relationships (tag_id, related_tag_id, relationship_type, created_at)
                 VALUES (?, ?, ?, ?)",
                params![from, to, kind.as_str(), now],
            )
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("{} relationship {} -> {} exists", kind.as_str(), from, to),
                    || format!("tag {} or tag {} does not exist", from, to),
                )
            })?;
        }
        tx.commit()?;
        debug!("linked tag {} -> {} as {}", tag_id, related_id, kind.as_str());
        Ok(())
    }
}

impl TagOps for SqliteStorage {
    fn create_tag(&self, name: &str, namespace: &str, color: Option<&str>) -> Result<Tag> {
        let name = normalize(name);
        let namespace = normalize(namespace);
        require_name(&name)?;
        self.conn
            .execute(
                "INSERT INTO tags (name, namespace, color, created_at) VALUES (?, ?, ?, ?)",
                params![name, namespace, color, Utc::now()],
            )
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("tag \"{}\" already exists", tag_label(&namespace, &name)),
                    || format!("tag \"{}\"", name),
                )
            })?;
        self.get_tag(self.conn.last_insert_rowid())
    }

    fn get_or_create_tag(&self, name: &str, namespace: &str, color: Option<&str>) -> Result<Tag> {
        let name = normalize(name);
        let namespace = normalize(namespace);
        require_name(&name)?;
        self.conn.execute(
            "INSERT INTO tags (name, namespace, color, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, name) DO NOTHING",
            params![name, namespace, color, Utc::now()],
        )?;
        self.get_tag_by_name(&name, &namespace)?.ok_or_else(|| {
            AssetError::NotFound(format!("tag \"{}\" vanished after creation", name))
        })
    }

    fn get_or_create_from_string(&self, tag: &str) -> Result<Tag> {
        let (namespace, name) = parse_tag_string(tag);
        self.get_or_create_tag(&name, &namespace, None)
    }

    fn get_tag(&self, id: i64) -> Result<Tag> {
        let sql = format!("SELECT {} FROM tags t WHERE t.id = ?", TAG_COLUMNS);
        self.conn
            .query_row(&sql, params![id], row_to_tag)
            .map_err(|e| not_found(e, || format!("Tag with id {} not found", id)))
    }

    fn get_tags(&self, ids: &[i64]) -> Result<Vec<Tag>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM tags t WHERE t.id IN ({}) ORDER BY t.namespace, t.name",
            TAG_COLUMNS, placeholders
        );
        self.fetch_all(&sql, rusqlite::params_from_iter(ids.iter()), row_to_tag)
    }

    fn get_tag_by_name(&self, name: &str, namespace: &str) -> Result<Option<Tag>> {
        let sql = format!(
            "SELECT {} FROM tags t WHERE t.namespace = ? AND t.name = ?",
            TAG_COLUMNS
        );
        self.fetch_one(&sql, params![normalize(namespace), normalize(name)], row_to_tag)
    }

    fn get_all_tags(&self) -> Result<Vec<Tag>> {
        let sql = format!("SELECT {} FROM tags t ORDER BY t.namespace, t.name", TAG_COLUMNS);
        self.fetch_all(&sql, [], row_to_tag)
    }

    fn get_tags_by_namespace(&self, namespace: &str) -> Result<Vec<Tag>> {
        let sql = format!(
            "SELECT {} FROM tags t WHERE t.namespace = ? ORDER BY t.name",
            TAG_COLUMNS
        );
        self.fetch_all(&sql, params![normalize(namespace)], row_to_tag)
    }

    fn get_namespaces(&self) -> Result<Vec<String>> {
        self.fetch_all(
            "SELECT DISTINCT namespace FROM tags WHERE namespace != '' ORDER BY namespace",
            [],
            |row| row.get(0),
        )
    }

    fn search_tags(&self, query: &str, limit: i64) -> Result<Vec<Tag>> {
        let sql = format!(
            "SELECT {} FROM tags t
             WHERE t.name LIKE '%' || ?1 || '%' OR t.namespace LIKE '%' || ?1 || '%'
             ORDER BY t.namespace, t.name
             LIMIT ?2",
            TAG_COLUMNS
        );
        self.fetch_all(&sql, params![normalize(query), limit], row_to_tag)
    }

    fn update_tag(&self, id: i64, update: TagUpdate) -> Result<Tag> {
        let mut sets = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(name) = update.name {
            let name = normalize(&name);
            require_name(&name)?;
            sets.push("name = ?");
            param_values.push(Box::new(name));
        }
        if let Some(namespace) = update.namespace {
            sets.push("namespace = ?");
            param_values.push(Box::new(normalize(&namespace)));
        }
        if let Some(color) = update.color {
            sets.push("color = ?");
            param_values.push(Box::new(color));
        }
        if sets.is_empty() {
            return self.get_tag(id);
        }
        param_values.push(Box::new(id));

        let sql = format!("UPDATE tags SET {} WHERE id = ?", sets.join(", "));
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let changes = self
            .conn
            .execute(&sql, param_refs.as_slice())
            .map_err(|e| {
                constraint_error(
                    e,
                    || format!("another tag already uses the new name of tag {}", id),
                    || format!("Tag with id {} not found", id),
                )
            })?;
        if changes == 0 {
            return Err(AssetError::NotFound(format!("Tag with id {} not found", id)));
        }
        self.get_tag(id)
    }

    fn delete_tag(&self, id: i64) -> Result<bool> {
        let changes = self.execute("DELETE FROM tags WHERE id = ?", params![id])?;
        Ok(changes > 0)
    }

    fn get_tag_usage_count(&self, id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM asset_tags WHERE tag_id = ?",
            params![id],
            |row| row.get(0),
        )?)
    }

    fn add_sibling(&self, tag_id: i64, sibling_id: i64) -> Result<()> {
        self.insert_relationship(tag_id, sibling_id, RelationshipKind::Sibling)
    }

    fn add_parent(&self, child_id: i64, parent_id: i64) -> Result<()> {
        self.insert_relationship(child_id, parent_id, RelationshipKind::Parent)
    }

    fn remove_relationship(&self, tag_id: i64, related_id: i64, kind: RelationshipKind) -> Result<bool> {
        let tx = self.write_tx()?;
        let mut removed = tx.execute(
            "DELETE FROM tag_relationships
             WHERE tag_id = ? AND related_tag_id = ? AND relationship_type = ?",
            params![tag_id, related_id, kind.as_str()],
        )?;
        if kind == RelationshipKind::Sibling {
            removed += tx.execute(
                "DELETE FROM tag_relationships
                 WHERE tag_id = ? AND related_tag_id = ? AND relationship_type = ?",
                params![related_id, tag_id, kind.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    fn get_siblings(&self, tag_id: i64) -> Result<Vec<Tag>> {
        self.related_tags(
            "t.id = tr.related_tag_id AND tr.tag_id = ?1",
            tag_id,
            RelationshipKind::Sibling,
        )
    }

    fn get_parents(&self, tag_id: i64) -> Result<Vec<Tag>> {
        self.related_tags(
            "t.id = tr.related_tag_id AND tr.tag_id = ?1",
            tag_id,
            RelationshipKind::Parent,
        )
    }

    fn get_children(&self, tag_id: i64) -> Result<Vec<Tag>> {
        self.related_tags(
            "t.id = tr.tag_id AND tr.related_tag_id = ?1",
            tag_id,
            RelationshipKind::Parent,
        )
    }

    /// Every ancestor reachable over parent edges, each listed once. The starting tag
    /// is never part of the result, even when a cycle leads back to it.
    fn get_all_parents(&self, tag_id: i64) -> Result<Vec<Tag>> {
        let mut seen = HashSet::from([tag_id]);
        let mut pending = vec![tag_id];
        let mut ancestors = Vec::new();

        while let Some(current) = pending.pop() {
            for parent in self.get_parents(current)? {
                if seen.insert(parent.id) {
                    pending.push(parent.id);
                    ancestors.push(parent);
                }
            }
        }
        Ok(ancestors)
    }

    /// Lowest-id tag among the tag and its direct siblings. Only one hop is followed.
    fn resolve_canonical_tag(&self, tag_id: i64) -> Result<Tag> {
        let tag = self.get_tag(tag_id)?;
        let canonical = self
            .get_siblings(tag_id)?
            .into_iter()
            .chain(std::iter::once(tag))
            .min_by_key(|t| t.id);
        canonical.ok_or_else(|| AssetError::NotFound(format!("Tag with id {} not found", tag_id)))
    }

    fn get_library_tags(&self, library_id: i64) -> Result<Vec<Tag>> {
        let sql = format!(
            "SELECT DISTINCT {} FROM tags t
             JOIN asset_tags at ON t.id = at.tag_id
             JOIN assets a ON at.asset_id = a.id
             WHERE a.library_id = ?
             ORDER BY t.namespace, t.name",
            TAG_COLUMNS
        );
        self.fetch_all(&sql, params![library_id], row_to_tag)
    }

    fn get_library_tag_counts(&self, library_id: i64) -> Result<BTreeMap<i64, i64>> {
        let rows: Vec<(i64, i64)> = self.fetch_all(
            "SELECT at.tag_id, COUNT(at.asset_id) FROM asset_tags at
             JOIN assets a ON at.asset_id = a.id
             WHERE a.library_id = ?
             GROUP BY at.tag_id",
            params![library_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(rows.into_iter().collect())
    }
}
