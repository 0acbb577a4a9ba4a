use std::path::PathBuf;

use crate::errors::{AssetError, Result};

pub struct AppPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| {
                AssetError::InvalidPath("could not determine the user data directory".to_string())
            })?
            .join("assetdex");
        Ok(Self::from_base(base))
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            db_path: base.join("assets.db"),
            base_dir: base,
        }
    }

    /// Paths rooted at the directory holding an explicitly chosen database file.
    pub fn with_db(db_path: PathBuf) -> Self {
        let base_dir = match db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self { base_dir, db_path }
    }
}
