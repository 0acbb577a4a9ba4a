use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{AssetError, Result};

pub const CHUNK_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialHash {
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub len: u64,
}

/// The windows sampled for a file of `size` bytes, in hashing order.
pub fn sample_windows(size: u64) -> Vec<Window> {
    if size == 0 {
        return Vec::new();
    }
    let mut windows = vec![Window {
        offset: 0,
        len: size.min(CHUNK_SIZE),
    }];
    if size > CHUNK_SIZE * 2 {
        windows.push(Window {
            offset: size / 2 - CHUNK_SIZE / 2,
            len: CHUNK_SIZE,
        });
    }
    if size > CHUNK_SIZE {
        windows.push(Window {
            offset: size - CHUNK_SIZE,
            len: CHUNK_SIZE,
        });
    }
    windows
}

pub fn compute(path: &Path) -> Result<PartialHash> {
    let mut file = File::open(path).map_err(|e| AssetError::io(path, e))?;
    let size = file.metadata().map_err(|e| AssetError::io(path, e))?.len();

    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());

    let mut buf = Vec::with_capacity(CHUNK_SIZE as usize);
    for window in sample_windows(size) {
        buf.clear();
        file.seek(SeekFrom::Start(window.offset))
            .map_err(|e| AssetError::io(path, e))?;
        (&mut file)
            .take(window.len)
            .read_to_end(&mut buf)
            .map_err(|e| AssetError::io(path, e))?;
        hasher.update(&buf);
    }

    Ok(PartialHash {
        hash: format!("{:x}", hasher.finalize()),
        size,
    })
}

/// True when the file at `path` still has the expected hash and size.
/// An unreadable file never verifies.
pub fn verify(path: &Path, expected_hash: &str, expected_size: u64) -> bool {
    match compute(path) {
        Ok(actual) => actual.size == expected_size && actual.hash == expected_hash,
        Err(e) => {
            debug!("verify failed to hash {}: {}", path.display(), e);
            false
        }
    }
}

/// Walks `dir` for a file with the given identity, checking size before hashing.
/// Entries are visited in file-name order, so the first match is stable for a given tree.
pub fn find_by_hash(dir: &Path, target_hash: &str, target_size: u64, recursive: bool) -> Option<PathBuf> {
    let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.len() == target_size => {}
            _ => continue,
        }
        match compute(entry.path()) {
            Ok(found) if found.size == target_size && found.hash == target_hash => {
                return Some(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => debug!("skipping {} during relocation: {}", entry.path().display(), e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn expected_digest(size: u64, parts: &[&[u8]]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(size.to_le_bytes());
        for part in parts {
            hasher.update(part);
        }
        format!("{:x}", hasher.finalize())
    }

    #[test]
    fn test_windows_empty_file() {
        assert!(sample_windows(0).is_empty());
    }

    #[test]
    fn test_windows_up_to_one_chunk() {
        assert_eq!(sample_windows(10), vec![Window { offset: 0, len: 10 }]);
        assert_eq!(sample_windows(65_536).len(), 1);
    }

    #[test]
    fn test_windows_between_one_and_two_chunks() {
        let windows = sample_windows(65_537);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1], Window { offset: 1, len: CHUNK_SIZE });
        assert_eq!(sample_windows(131_072).len(), 2);
    }

    #[test]
    fn test_windows_above_two_chunks() {
        let windows = sample_windows(131_073);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].offset, 131_073 / 2 - 32_768);
        assert_eq!(windows[2].offset, 131_073 - CHUNK_SIZE);
    }

    #[test]
    fn test_windows_bounded_for_large_files() {
        let total: u64 = sample_windows(10 * 1024 * 1024 * 1024).iter().map(|w| w.len).sum();
        assert_eq!(total, 3 * CHUNK_SIZE);
    }

    #[test]
    fn test_empty_file_hashes_size_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();
        let result = compute(&path).unwrap();
        assert_eq!(result.size, 0);
        assert_eq!(result.hash, expected_digest(0, &[]));
    }

    #[test]
    fn test_small_file_hashes_whole_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.png");
        let data = patterned(10_000);
        fs::write(&path, &data).unwrap();
        let result = compute(&path).unwrap();
        assert_eq!(result.size, 10_000);
        assert_eq!(result.hash, expected_digest(10_000, &[&data]));
    }

    #[test]
    fn test_medium_file_reads_first_and_last() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("medium.bin");
        let data = patterned(100_000);
        fs::write(&path, &data).unwrap();
        let result = compute(&path).unwrap();
        let first = &data[..65_536];
        let last = &data[100_000 - 65_536..];
        assert_eq!(result.hash, expected_digest(100_000, &[first, last]));
    }

    #[test]
    fn test_large_file_reads_three_windows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large.bin");
        let size = 300_000usize;
        let data = patterned(size);
        fs::write(&path, &data).unwrap();
        let result = compute(&path).unwrap();
        let mid = size / 2 - 32_768;
        let expected = expected_digest(
            size as u64,
            &[&data[..65_536], &data[mid..mid + 65_536], &data[size - 65_536..]],
        );
        assert_eq!(result.hash, expected);
    }

    #[test]
    fn test_unsampled_bytes_do_not_affect_hash() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let data = patterned(400_000);
        let mut altered = data.clone();
        // inside the gap between the head and middle windows
        altered[80_000] ^= 0xff;
        fs::write(&a, &data).unwrap();
        fs::write(&b, &altered).unwrap();
        assert_eq!(compute(&a).unwrap(), compute(&b).unwrap());
    }

    #[test]
    fn test_rename_keeps_hash() {
        let dir = TempDir::new().unwrap();
        let before = dir.path().join("before.png");
        let after = dir.path().join("after.png");
        fs::write(&before, patterned(200_000)).unwrap();
        let original = compute(&before).unwrap();
        fs::rename(&before, &after).unwrap();
        assert_eq!(compute(&after).unwrap(), original);
    }

    #[test]
    fn test_same_prefix_different_size() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, vec![0u8; 100]).unwrap();
        fs::write(&b, vec![0u8; 101]).unwrap();
        assert_ne!(compute(&a).unwrap().hash, compute(&b).unwrap().hash);
    }

    #[test]
    fn test_compute_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = compute(&dir.path().join("ghost.png"));
        assert!(matches!(result, Err(AssetError::Io { .. })));
    }

    #[test]
    fn test_verify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.png");
        fs::write(&path, b"verify me").unwrap();
        let ph = compute(&path).unwrap();
        assert!(verify(&path, &ph.hash, ph.size));
        assert!(!verify(&path, &ph.hash, ph.size + 1));
        assert!(!verify(&path, "deadbeef", ph.size));
        assert!(!verify(&dir.path().join("missing.png"), &ph.hash, ph.size));
    }

    #[test]
    fn test_find_by_hash_recursive() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("deep").join("er");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("decoy.png"), b"same-size!").unwrap();
        let target = nested.join("target.png");
        fs::write(&target, b"find me ok").unwrap();
        let ph = compute(&target).unwrap();

        let found = find_by_hash(dir.path(), &ph.hash, ph.size, true);
        assert_eq!(found, Some(target));
        assert!(find_by_hash(dir.path(), &ph.hash, ph.size, false).is_none());
    }

    #[test]
    fn test_find_by_hash_no_match() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.png"), b"content").unwrap();
        assert!(find_by_hash(dir.path(), "nope", 7, true).is_none());
    }
}
