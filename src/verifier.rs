use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::errors::{AssetError, Result};
use crate::hash;
use crate::storage::models::{Asset, AssetFilter, AssetUpdate};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::{AssetOps, LibraryRegistry};
use crate::task::WorkerTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    pub verified: i64,
    pub missing: i64,
    pub relocated: i64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyEvent {
    Progress { current: usize, total: usize },
    Missing { asset_id: i64 },
    Relocated { asset_id: i64, path: PathBuf },
    Finished(VerifySummary),
    Failed(String),
}

pub type VerifyTask = WorkerTask<VerifyEvent, VerifySummary>;

fn still_matches(asset: &Asset) -> bool {
    let Some(path) = asset.current_path.as_deref() else {
        return false;
    };
    let Ok(size) = u64::try_from(asset.file_size) else {
        return false;
    };
    path.is_file() && hash::verify(path, &asset.partial_hash, size)
}

fn relocate(root: &Path, recursive: bool, asset: &Asset) -> Option<PathBuf> {
    let size = u64::try_from(asset.file_size).ok()?;
    hash::find_by_hash(root, &asset.partial_hash, size, recursive)
}

/// Runs one verify pass over all assets of a library, including ones already
/// flagged missing, on the calling thread.
pub fn verify_library<S, F>(
    store: &S,
    library_id: i64,
    relocate_moved: bool,
    token: &CancellationToken,
    mut on_event: F,
) -> Result<VerifySummary>
where
    S: LibraryRegistry + AssetOps,
    F: FnMut(VerifyEvent),
{
    let library = store.get_library(library_id)?;
    let assets = store.get_library_assets(
        library_id,
        &AssetFilter {
            include_missing: true,
            ..Default::default()
        },
    )?;

    let mut summary = VerifySummary::default();
    let total = assets.len();
    for (i, asset) in assets.iter().enumerate() {
        if token.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        on_event(VerifyEvent::Progress {
            current: i + 1,
            total,
        });

        if still_matches(asset) {
            summary.verified += 1;
            if asset.is_missing {
                store.update_asset(
                    asset.id,
                    AssetUpdate {
                        is_missing: Some(false),
                        ..Default::default()
                    },
                )?;
            }
            continue;
        }

        if relocate_moved {
            if let Some(found) = relocate(&library.root_path, library.scan_subdirs, asset) {
                let moved = store.update_asset(
                    asset.id,
                    AssetUpdate {
                        current_path: Some(found.clone()),
                        is_missing: Some(false),
                        ..Default::default()
                    },
                );
                match moved {
                    Ok(()) => {
                        debug!("asset {} relocated to {}", asset.id, found.display());
                        summary.relocated += 1;
                        on_event(VerifyEvent::Relocated {
                            asset_id: asset.id,
                            path: found,
                        });
                        continue;
                    }
                    Err(AssetError::InvalidPath(reason)) => {
                        warn!("cannot relocate asset {}: {}", asset.id, reason);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !asset.is_missing {
            store.update_asset(
                asset.id,
                AssetUpdate {
                    is_missing: Some(true),
                    ..Default::default()
                },
            )?;
        }
        summary.missing += 1;
        on_event(VerifyEvent::Missing { asset_id: asset.id });
    }

    info!(
        "verified \"{}\": {} ok, {} missing, {} relocated{}",
        library.name,
        summary.verified,
        summary.missing,
        summary.relocated,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(summary)
}

/// Starts a verify pass on a worker thread with its own connection to `db_path`.
/// The last event is always `Finished` or `Failed`.
pub fn start_verify(db_path: &Path, library_id: i64, relocate_moved: bool) -> Result<VerifyTask> {
    let db_path = db_path.to_path_buf();
    WorkerTask::spawn("assetdex-verify", move |token, events| {
        let result = SqliteStorage::open(&db_path).and_then(|store| {
            verify_library(&store, library_id, relocate_moved, token, |event| {
                let _ = events.send(event);
            })
        });
        let last = match &result {
            Ok(summary) => VerifyEvent::Finished(*summary),
            Err(e) => VerifyEvent::Failed(e.to_string()),
        };
        let _ = events.send(last);
        result
    })
}
