use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::errors::{AssetError, Result};
use crate::hash;
use crate::storage::models::NewAsset;
use crate::storage::sqlite::SqliteStorage;
use crate::storage::{AssetOps, LibraryRegistry};
use crate::task::WorkerTask;

/// Default extension allow-list, lowercase and without the leading dot.
pub const ASSET_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "tga", "tiff", "tif", "webp", "ico", "svg", "psd", "xcf",
    "kra", "clip",
    // 3d
    "fbx", "obj", "gltf", "glb", "blend", "max", "ma", "mb", "3ds", "dae", "stl", "ply",
    // audio
    "wav", "mp3", "ogg", "flac", "aac", "m4a", "wma",
    // video
    "mp4", "avi", "mov", "mkv", "webm", "wmv",
    // fonts
    "ttf", "otf", "woff", "woff2",
    // documents
    "pdf", "txt", "json", "xml", "yaml", "yml",
    // game data
    "atlas", "spine", "prefab", "asset", "mat", "shader",
];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// When false, every asset is flagged missing before the pass and only the files
    /// found again are cleared.
    pub incremental: bool,
    /// Overrides [`ASSET_EXTENSIONS`]. Entries may carry a leading dot and any case.
    pub extensions: Option<Vec<String>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            incremental: true,
            extensions: None,
        }
    }
}

impl ScanOptions {
    pub fn full() -> Self {
        Self {
            incremental: false,
            ..Default::default()
        }
    }

    fn allowed_extensions(&self) -> Vec<String> {
        match &self.extensions {
            Some(list) => list
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            None => ASSET_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub added: i64,
    pub updated: i64,
    pub missing: i64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Progress {
        current: usize,
        total: usize,
        path: PathBuf,
    },
    FileScanned {
        asset_id: i64,
        path: PathBuf,
        added: bool,
    },
    Finished(ScanSummary),
    Failed(String),
}

pub type ScanTask = WorkerTask<ScanEvent, ScanSummary>;

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.as_encoded_bytes().first() == Some(&b'.'))
        .unwrap_or(false)
}

fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| allowed.iter().any(|a| *a == ext))
        .unwrap_or(false)
}

/// Candidate files under `root` in walk order (sorted by file name per directory).
/// Unreadable directory entries are skipped. Stops early once `token` is cancelled.
pub fn collect_files(
    root: &Path,
    recursive: bool,
    options: &ScanOptions,
    token: &CancellationToken,
) -> Vec<PathBuf> {
    let allowed = options.allowed_extensions();
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        if token.is_cancelled() {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_file() && !is_hidden(path) && has_allowed_extension(path, &allowed)
        {
            files.push(entry.into_path());
        }
    }
    files
}

/// A file that cannot be hashed or stored is skipped; store failures abort the pass.
pub fn scan_library<S, F>(
    store: &S,
    library_id: i64,
    options: &ScanOptions,
    token: &CancellationToken,
    mut on_event: F,
) -> Result<ScanSummary>
where
    S: LibraryRegistry + AssetOps,
    F: FnMut(ScanEvent),
{
    let library = store.get_library(library_id)?;
    if !library.root_path.is_dir() {
        return Err(AssetError::InvalidPath(format!(
            "library root does not exist: {}",
            library.root_path.display()
        )));
    }

    let files = collect_files(&library.root_path, library.scan_subdirs, options, token);
    let mut summary = ScanSummary::default();

    if token.is_cancelled() {
        summary.cancelled = true;
        summary.missing = store.get_library_stats(library_id)?.missing_assets;
        info!("scan of \"{}\" cancelled before reconciling", library.name);
        return Ok(summary);
    }

    if !options.incremental {
        let flagged = store.mark_assets_missing(library_id)?;
        debug!("full scan: flagged {} assets missing", flagged);
    }

    let total = files.len();
    for (i, path) in files.into_iter().enumerate() {
        if token.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        on_event(ScanEvent::Progress {
            current: i + 1,
            total,
            path: path.clone(),
        });

        let partial = match hash::compute(&path) {
            Ok(partial) => partial,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let Ok(file_size) = i64::try_from(partial.size) else {
            warn!("skipping {}: size {} out of range", path.display(), partial.size);
            continue;
        };

        let upserted = store.upsert_asset(NewAsset {
            library_id,
            partial_hash: partial.hash,
            file_size,
            current_path: path.clone(),
            original_filename: None,
        });
        let (asset, inserted) = match upserted {
            Ok(result) => result,
            Err(AssetError::InvalidPath(reason)) => {
                warn!("skipping {}: {}", path.display(), reason);
                continue;
            }
            Err(e) => return Err(e),
        };
        if inserted {
            summary.added += 1;
        } else {
            summary.updated += 1;
        }
        on_event(ScanEvent::FileScanned {
            asset_id: asset.id,
            path,
            added: inserted,
        });
    }

    summary.missing = store.get_library_stats(library_id)?.missing_assets;
    info!(
        "scanned \"{}\": {} added, {} updated, {} missing{}",
        library.name,
        summary.added,
        summary.updated,
        summary.missing,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(summary)
}

/// Starts a scan on a worker thread with its own connection to `db_path`.
/// The last event is always `Finished` or `Failed`.
pub fn start_scan(db_path: &Path, library_id: i64, options: ScanOptions) -> Result<ScanTask> {
    let db_path = db_path.to_path_buf();
    WorkerTask::spawn("assetdex-scan", move |token, events| {
        let result = SqliteStorage::open(&db_path).and_then(|store| {
            scan_library(&store, library_id, &options, token, |event| {
                let _ = events.send(event);
            })
        });
        let last = match &result {
            Ok(summary) => ScanEvent::Finished(*summary),
            Err(e) => ScanEvent::Failed(e.to_string()),
        };
        let _ = events.send(last);
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TagOps;
    use crate::storage::models::{AssetFilter, AssetUpdate, Library};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        db_path: PathBuf,
        storage: SqliteStorage,
        library: Library,
    }

    fn fixture(scan_subdirs: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("library");
        fs::create_dir(&root).unwrap();
        let db_path = dir.path().join("assets.db");
        let storage = SqliteStorage::open(&db_path).unwrap();
        let library = storage.create_library("lib", &root, scan_subdirs).unwrap();
        Fixture {
            _dir: dir,
            root,
            db_path,
            storage,
            library,
        }
    }

    fn write(path: &Path, seed: u8, len: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        fs::write(path, data).unwrap();
    }

    fn scan(f: &Fixture, options: &ScanOptions) -> ScanSummary {
        scan_library(&f.storage, f.library.id, options, &CancellationToken::new(), |_| {}).unwrap()
    }

    fn all_assets(f: &Fixture) -> Vec<crate::storage::models::Asset> {
        f.storage
            .get_library_assets(
                f.library.id,
                &AssetFilter {
                    include_missing: true,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    // --- File collection ---

    #[test]
    fn test_collect_filters_extensions_and_dotfiles() {
        let f = fixture(true);
        write(&f.root.join("a.png"), 1, 10);
        write(&f.root.join("B.TXT"), 2, 10);
        write(&f.root.join("c.unknown"), 3, 10);
        write(&f.root.join(".hidden.png"), 4, 10);
        write(&f.root.join("noext"), 5, 10);
        fs::create_dir(f.root.join("folder.png")).unwrap();

        let files = collect_files(&f.root, true, &ScanOptions::default(), &CancellationToken::new());
        assert_eq!(files, vec![f.root.join("B.TXT"), f.root.join("a.png")]);
    }

    #[test]
    fn test_collect_custom_extensions() {
        let f = fixture(true);
        write(&f.root.join("a.png"), 1, 10);
        write(&f.root.join("b.txt"), 2, 10);
        write(&f.root.join("c.raw"), 3, 10);
        let options = ScanOptions {
            incremental: true,
            extensions: Some(vec![".PNG".to_string(), "raw".to_string()]),
        };
        let files = collect_files(&f.root, true, &options, &CancellationToken::new());
        assert_eq!(files, vec![f.root.join("a.png"), f.root.join("c.raw")]);
    }

    #[test]
    fn test_collect_respects_recursion() {
        let f = fixture(false);
        write(&f.root.join("top.png"), 1, 10);
        write(&f.root.join("sub").join("deep.png"), 2, 10);
        let token = CancellationToken::new();
        let flat = collect_files(&f.root, false, &ScanOptions::default(), &token);
        assert_eq!(flat, vec![f.root.join("top.png")]);
        let deep = collect_files(&f.root, true, &ScanOptions::default(), &token);
        assert_eq!(deep.len(), 2);
    }

    // --- Scanning ---

    #[test]
    fn test_identical_files_share_one_asset() {
        let f = fixture(true);
        write(&f.root.join("a.png"), 7, 10 * 1024);
        write(&f.root.join("b.png"), 7, 10 * 1024);

        let summary = scan(&f, &ScanOptions::default());
        assert_eq!(summary.added, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.missing, 0);
        assert!(!summary.cancelled);
        assert_eq!(all_assets(&f).len(), 1);
    }

    #[test]
    fn test_moved_file_keeps_its_asset() {
        let f = fixture(true);
        write(&f.root.join("hero.png"), 1, 2048);
        write(&f.root.join("other.png"), 2, 2048);
        let first = scan(&f, &ScanOptions::default());
        assert_eq!(first.added, 2);

        let hero = f
            .storage
            .get_asset_by_path(&f.root.join("hero.png"))
            .unwrap()
            .unwrap();
        f.storage
            .update_asset(
                hero.id,
                AssetUpdate {
                    rating: Some(5),
                    notes: Some("main character".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let tag = f.storage.get_or_create_from_string("character:hero").unwrap();
        f.storage.add_tag_to_asset(hero.id, tag.id).unwrap();

        let moved = f.root.join("characters").join("hero.png");
        fs::create_dir(f.root.join("characters")).unwrap();
        fs::rename(f.root.join("hero.png"), &moved).unwrap();

        let second = scan(&f, &ScanOptions::default());
        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(all_assets(&f).len(), 2);

        let after = f.storage.get_asset(hero.id).unwrap();
        assert_eq!(after.current_path.as_deref(), Some(moved.as_path()));
        assert_eq!(after.rating, 5);
        assert_eq!(after.notes.as_deref(), Some("main character"));
        assert_eq!(after.tags, vec!["character:hero"]);
        assert_eq!(after.original_filename, "hero.png");
    }

    #[test]
    fn test_full_scan_flags_unseen_assets() {
        let f = fixture(true);
        write(&f.root.join("keep.png"), 1, 100);
        write(&f.root.join("gone.png"), 2, 100);
        scan(&f, &ScanOptions::default());
        fs::remove_file(f.root.join("gone.png")).unwrap();

        let incremental = scan(&f, &ScanOptions::default());
        assert_eq!(incremental.missing, 0);

        let full = scan(&f, &ScanOptions::full());
        assert_eq!(full.added, 0);
        assert_eq!(full.updated, 1);
        assert_eq!(full.missing, 1);

        let gone: Vec<_> = all_assets(&f).into_iter().filter(|a| a.is_missing).collect();
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].original_filename, "gone.png");
    }

    #[test]
    fn test_rescan_clears_missing_flag() {
        let f = fixture(true);
        write(&f.root.join("back.png"), 1, 100);
        scan(&f, &ScanOptions::default());
        f.storage.mark_assets_missing(f.library.id).unwrap();

        let summary = scan(&f, &ScanOptions::default());
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.missing, 0);
    }

    #[test]
    fn test_changed_content_is_a_new_asset() {
        let f = fixture(true);
        let path = f.root.join("edit.png");
        write(&path, 1, 100);
        scan(&f, &ScanOptions::default());
        write(&path, 9, 100);
        let summary = scan(&f, &ScanOptions::default());
        assert_eq!(summary.added, 1);
        assert_eq!(all_assets(&f).len(), 2);
    }

    #[test]
    fn test_non_recursive_library_ignores_subdirs() {
        let f = fixture(false);
        write(&f.root.join("top.png"), 1, 100);
        write(&f.root.join("sub").join("deep.png"), 2, 100);
        let summary = scan(&f, &ScanOptions::default());
        assert_eq!(summary.added, 1);
    }

    #[test]
    fn test_scan_events() {
        let f = fixture(true);
        write(&f.root.join("a.png"), 1, 100);
        write(&f.root.join("b.png"), 2, 100);
        let mut events = Vec::new();
        scan_library(
            &f.storage,
            f.library.id,
            &ScanOptions::default(),
            &CancellationToken::new(),
            |event| events.push(event),
        )
        .unwrap();

        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            ScanEvent::Progress {
                current: 1,
                total: 2,
                path: f.root.join("a.png"),
            }
        );
        assert!(matches!(
            &events[1],
            ScanEvent::FileScanned { added: true, path, .. } if *path == f.root.join("a.png")
        ));
        assert!(matches!(events[2], ScanEvent::Progress { current: 2, .. }));
    }

    #[test]
    fn test_cancelled_scan_changes_nothing() {
        let f = fixture(true);
        write(&f.root.join("a.png"), 1, 100);
        let token = CancellationToken::new();
        token.cancel();
        let summary =
            scan_library(&f.storage, f.library.id, &ScanOptions::full(), &token, |_| {}).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.added, 0);
        assert!(all_assets(&f).is_empty());
    }

    #[test]
    fn test_cancel_mid_scan_stops_at_file_boundary() {
        let f = fixture(true);
        for i in 0..5u8 {
            write(&f.root.join(format!("{}.png", i)), i, 100);
        }
        let token = CancellationToken::new();
        let summary = scan_library(&f.storage, f.library.id, &ScanOptions::default(), &token, |event| {
            if let ScanEvent::FileScanned { .. } = event {
                token.cancel();
            }
        })
        .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.added, 1);
        assert_eq!(all_assets(&f).len(), 1);
    }

    #[test]
    fn test_scan_unknown_library() {
        let f = fixture(true);
        let result = scan_library(&f.storage, 999, &ScanOptions::default(), &CancellationToken::new(), |_| {});
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_scan_missing_root() {
        let f = fixture(true);
        fs::remove_dir_all(&f.root).unwrap();
        let result = scan_library(
            &f.storage,
            f.library.id,
            &ScanOptions::default(),
            &CancellationToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(AssetError::InvalidPath(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let f = fixture(true);
        write(&f.root.join("ok.png"), 1, 100);
        write(&f.root.join(OsStr::from_bytes(b"caf\xe9.png")), 2, 100);
        write(&f.root.join(OsStr::from_bytes(b".h\xe9.png")), 3, 100);

        let files = collect_files(&f.root, true, &ScanOptions::default(), &CancellationToken::new());
        assert_eq!(files.len(), 2);

        let summary = scan(&f, &ScanOptions::default());
        assert_eq!(summary.added, 1);
        assert_eq!(summary.updated, 0);
        let assets = all_assets(&f);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].current_path, Some(f.root.join("ok.png")));

        let again = scan(&f, &ScanOptions::full());
        assert_eq!(again.missing, 0);
    }

    // --- Background worker ---

    #[test]
    fn test_start_scan_reports_finished() {
        let f = fixture(true);
        write(&f.root.join("a.png"), 1, 100);
        write(&f.root.join("b.jpg"), 2, 100);

        let task = start_scan(&f.db_path, f.library.id, ScanOptions::default()).unwrap();
        let events = task.events().clone();
        let summary = task.wait().unwrap();
        assert_eq!(summary.added, 2);

        let events: Vec<ScanEvent> = events.iter().collect();
        assert_eq!(events.last(), Some(&ScanEvent::Finished(summary)));
        let scanned = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::FileScanned { .. }))
            .count();
        assert_eq!(scanned, 2);
        assert_eq!(all_assets(&f).len(), 2);
    }

    #[test]
    fn test_concurrent_scans_never_duplicate() {
        let f = fixture(true);
        let count = 24;
        for i in 0..count {
            write(&f.root.join(format!("{:02}.png", i)), i as u8, 512 + i);
        }

        let first = start_scan(&f.db_path, f.library.id, ScanOptions::default()).unwrap();
        let second = start_scan(&f.db_path, f.library.id, ScanOptions::default()).unwrap();
        let a = first.wait().unwrap();
        let b = second.wait().unwrap();

        let stats = f.storage.get_library_stats(f.library.id).unwrap();
        assert_eq!(stats.total_assets, count as i64);
        assert_eq!(a.added + b.added, count as i64);
        assert_eq!(a.added + a.updated, count as i64);
        assert_eq!(b.added + b.updated, count as i64);
    }

    #[test]
    fn test_start_scan_reports_failure() {
        let f = fixture(true);
        let task = start_scan(&f.db_path, 42, ScanOptions::default()).unwrap();
        let events = task.events().clone();
        assert!(matches!(task.wait(), Err(AssetError::NotFound(_))));
        let events: Vec<ScanEvent> = events.iter().collect();
        assert!(matches!(events.as_slice(), [ScanEvent::Failed(_)]));
    }
}
