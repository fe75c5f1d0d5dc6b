//! Shard file format (§6.2) and the write-temp-then-rename atomic write
//! grounded directly on `k-jingyang/lsm-tree`'s `rewrite_atomic`.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::errors::ContextError;
use crate::segment::Segment;

const SHARD_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardFile {
    pub version: String,
    pub segments: Vec<Segment>,
}

impl ShardFile {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            version: SHARD_VERSION.to_string(),
            segments,
        }
    }
}

/// Writes `shard` to `path` via a temp file in the same directory followed by
/// a rename, so a crash mid-write never leaves a half-written shard visible
/// at `path`.
pub fn write_shard_atomic(path: &Path, shard: &ShardFile) -> Result<(), ContextError> {
    let dir = path.parent().ok_or_else(|| ContextError::StorageIo {
        path: path.display().to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "shard path has no parent"),
    })?;
    std::fs::create_dir_all(dir).map_err(|source| ContextError::StorageIo {
        path: dir.display().to_string(),
        source,
    })?;

    let io_err = |source: io::Error| ContextError::StorageIo {
        path: path.display().to_string(),
        source,
    };

    let body = serde_json::to_vec_pretty(shard).map_err(|e| ContextError::StorageIo {
        path: path.display().to_string(),
        source: io::Error::other(e),
    })?;

    let mut temp_file = NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        use std::io::Write;
        temp_file.write_all(&body).map_err(io_err)?;
        temp_file.as_file().sync_all().map_err(io_err)?;
    }
    temp_file
        .persist(path)
        .map_err(|e| io_err(e.error))?;

    #[cfg(not(windows))]
    {
        if let Ok(file) = std::fs::File::open(path) {
            let _ = file.sync_all();
        }
    }

    Ok(())
}

/// Loads a shard, treating invalid JSON as a recoverable `StorageCorrupt`
/// condition per §4.D step 2 rather than propagating a hard I/O error.
pub fn read_shard(project_id: &str, path: &Path) -> Result<ShardFile, ContextError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(ShardFile::new(Vec::new()));
        }
        Err(source) => {
            return Err(ContextError::StorageIo {
                path: path.display().to_string(),
                source,
            });
        }
    };

    match serde_json::from_slice::<ShardFile>(&bytes) {
        Ok(shard) => Ok(shard),
        Err(e) => {
            warn!(project_id, path = %path.display(), error = %e, "shard is corrupt, treating as empty");
            Err(ContextError::StorageCorrupt {
                project_id: project_id.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Removes any leftover `*.tmp` files under `root`, run once on startup
/// per §4.D step 1.
pub fn cleanup_tmp_files(root: &Path) -> io::Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in walk_files(root)? {
        if entry.extension().and_then(|e| e.to_str()) == Some("tmp") {
            warn!(path = %entry.display(), "discarding leftover atomic-write temp file");
            std::fs::remove_file(&entry)?;
        }
    }
    Ok(())
}

fn walk_files(root: &Path) -> io::Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentType;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj.json");
        let segment = Segment::new("s1", "proj", "hello", SegmentType::Note, 1000);
        let shard = ShardFile::new(vec![segment]);

        write_shard_atomic(&path, &shard).unwrap();
        let loaded = read_shard("proj", &path).unwrap();

        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.segments[0].segment_id, "s1");
        assert!(!dir.path().join("proj.json.tmp").exists());
    }

    #[test]
    fn corrupt_shard_is_reported_not_panicked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = read_shard("proj", &path);
        assert!(matches!(result, Err(ContextError::StorageCorrupt { .. })));
    }

    #[test]
    fn missing_shard_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let shard = read_shard("proj", &path).unwrap();
        assert!(shard.segments.is_empty());
    }

    #[test]
    fn cleanup_removes_tmp_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("stale.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.json"), b"{}").unwrap();

        cleanup_tmp_files(dir.path()).unwrap();

        assert!(!dir.path().join("stale.tmp").exists());
        assert!(dir.path().join("keep.json").exists());
    }
}
