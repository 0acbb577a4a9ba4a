pub const CREATE_LIBRARIES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS libraries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        root_path TEXT NOT NULL,
        scan_subdirs INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

pub const CREATE_ASSETS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS assets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        library_id INTEGER NOT NULL,
        partial_hash TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        current_path TEXT,
        original_filename TEXT NOT NULL,
        file_extension TEXT,
        rating INTEGER NOT NULL DEFAULT 0 CHECK (rating BETWEEN 0 AND 5),
        notes TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_seen_at TEXT,
        is_missing INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (library_id) REFERENCES libraries(id) ON DELETE CASCADE,
        UNIQUE(library_id, partial_hash, file_size)
    );
";

pub const CREATE_TAGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL DEFAULT '',
        color TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(namespace, name)
    );
";

pub const CREATE_ASSET_TAGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS asset_tags (
        asset_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (asset_id, tag_id),
        FOREIGN KEY (asset_id) REFERENCES assets(id) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
    );
";

pub const CREATE_TAG_RELATIONSHIPS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS tag_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tag_id INTEGER NOT NULL,
        related_tag_id INTEGER NOT NULL,
        relationship_type TEXT NOT NULL CHECK (relationship_type IN ('sibling', 'parent')),
        created_at TEXT NOT NULL,
        FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE,
        FOREIGN KEY (related_tag_id) REFERENCES tags(id) ON DELETE CASCADE,
        UNIQUE(tag_id, related_tag_id, relationship_type)
    );
";

pub const CREATE_SCHEMA_VERSION_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
";

pub const CREATE_INDEXES_V1: &str = "
    CREATE INDEX IF NOT EXISTS idx_assets_library ON assets(library_id);
    CREATE INDEX IF NOT EXISTS idx_assets_hash ON assets(partial_hash, file_size);
    CREATE INDEX IF NOT EXISTS idx_assets_path ON assets(current_path);
    CREATE INDEX IF NOT EXISTS idx_assets_missing ON assets(is_missing);
    CREATE INDEX IF NOT EXISTS idx_asset_tags_asset ON asset_tags(asset_id);
    CREATE INDEX IF NOT EXISTS idx_asset_tags_tag ON asset_tags(tag_id);
    CREATE INDEX IF NOT EXISTS idx_tags_namespace ON tags(namespace, name);
    CREATE INDEX IF NOT EXISTS idx_tag_relationships_tag ON tag_relationships(tag_id);
";

pub const CREATE_INDEX_RELATED_TAG: &str = "
    CREATE INDEX IF NOT EXISTS idx_tag_relationships_related
        ON tag_relationships(related_tag_id, relationship_type);
";

/// Every table and index of the current schema, in dependency order.
pub const FULL_SCHEMA: &[&str] = &[
    CREATE_LIBRARIES_TABLE,
    CREATE_ASSETS_TABLE,
    CREATE_TAGS_TABLE,
    CREATE_ASSET_TAGS_TABLE,
    CREATE_TAG_RELATIONSHIPS_TABLE,
    CREATE_SCHEMA_VERSION_TABLE,
    CREATE_INDEXES_V1,
    CREATE_INDEX_RELATED_TAG,
];
