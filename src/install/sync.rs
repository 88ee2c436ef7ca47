//! File tree primitives: copy file, copy tree, mirror tree
//!
//! `mirror_tree` is the rsync-style update used when an unpacked archive
//! root is fresher than the archive: only new or changed files are written
//! and anything no longer present in the source is removed, so Xcode's
//! incremental machinery sees untouched files keep their timestamps.
//! Directory permissions are not copied; Bazel marks its outputs read-only.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Errors from tree operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Path is not within {root}: {path}")]
    PathNotInRoot { root: PathBuf, path: PathBuf },
}

/// Result type for tree operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Counters reported by [`mirror_tree`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Remove whatever is at `path`: directory tree, file or symlink.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copy one file, creating parent directories. Permissions are preserved.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

fn relative<'a>(root: &Path, path: &'a Path) -> SyncResult<&'a Path> {
    path.strip_prefix(root).map_err(|_| SyncError::PathNotInRoot {
        root: root.to_path_buf(),
        path: path.to_path_buf(),
    })
}

/// Copy the tree at `src` to `dst`, which must not exist yet.
pub fn copy_tree(src: &Path, dst: &Path) -> SyncResult<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let target = dst.join(relative(src, entry.path())?);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn same_file_contents(src: &Path, dst: &Path) -> io::Result<bool> {
    let dst_meta = match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if fs::metadata(src)?.len() != dst_meta.len() {
        return Ok(false);
    }
    Ok(file_digest(src)? == file_digest(dst)?)
}

/// Make `dst` an exact copy of `src`, touching only what differs.
pub fn mirror_tree(src: &Path, dst: &Path) -> SyncResult<SyncStats> {
    let mut stats = SyncStats::default();
    let mut seen = BTreeSet::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let rel = relative(src, entry.path())?.to_path_buf();
        let target = dst.join(&rel);
        let file_type = entry.file_type();
        let existing = fs::symlink_metadata(&target).ok();

        if file_type.is_dir() {
            if existing.as_ref().is_some_and(|m| !m.is_dir()) {
                remove_path(&target)?;
            }
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if fs::read_link(&target).ok().as_ref() == Some(&link) {
                stats.unchanged += 1;
            } else {
                remove_path(&target)?;
                copy_symlink(entry.path(), &target)?;
                stats.copied += 1;
            }
        } else if same_file_contents(entry.path(), &target)? {
            let mode = entry.metadata()?.permissions();
            if fs::metadata(&target)?.permissions() != mode {
                fs::set_permissions(&target, mode)?;
            }
            stats.unchanged += 1;
        } else {
            if existing.is_some() {
                remove_path(&target)?;
            }
            fs::copy(entry.path(), &target)?;
            stats.copied += 1;
        }
        seen.insert(rel);
    }

    if dst.exists() {
        // Children before parents so directories empty out first.
        for entry in WalkDir::new(dst).follow_links(false).contents_first(true) {
            let entry = entry?;
            let rel = relative(dst, entry.path())?;
            if rel.as_os_str().is_empty() || seen.contains(rel) {
                continue;
            }
            if fs::symlink_metadata(entry.path()).is_ok() {
                remove_path(entry.path())?;
                stats.removed += 1;
            }
        }
    }

    debug!(src = %src.display(), dst = %dst.display(), ?stats, "mirrored tree");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_copy_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("App.app");
        write(&src.join("App"), "binary");
        write(&src.join("PlugIns/W.appex/W"), "ext");

        let dst = dir.path().join("out/App.app");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("App")).unwrap(), "binary");
        assert_eq!(fs::read_to_string(dst.join("PlugIns/W.appex/W")).unwrap(), "ext");
    }

    #[test]
    fn test_copy_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("libFoo.a");
        fs::write(&src, "archive").unwrap();

        let dst = dir.path().join("a/b/libFoo.a");
        copy_file(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst).unwrap(), "archive");
    }

    #[test]
    fn test_mirror_tree_updates_and_deletes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("same.txt"), "same");
        write(&src.join("changed.txt"), "new contents");
        write(&src.join("sub/added.txt"), "added");

        write(&dst.join("same.txt"), "same");
        write(&dst.join("changed.txt"), "old");
        write(&dst.join("stale/gone.txt"), "gone");
        write(&dst.join("extra.txt"), "extra");

        let stats = mirror_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("changed.txt")).unwrap(), "new contents");
        assert_eq!(fs::read_to_string(dst.join("sub/added.txt")).unwrap(), "added");
        assert!(!dst.join("extra.txt").exists());
        assert!(!dst.join("stale").exists());
        assert_eq!(stats.copied, 2);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.removed, 3);
    }

    #[test]
    fn test_mirror_tree_into_missing_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write(&src.join("a/b.txt"), "b");

        let dst = dir.path().join("nested/dst");
        mirror_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("a/b.txt")).unwrap(), "b");
    }

    #[test]
    fn test_mirror_replaces_file_with_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("thing/inner.txt"), "inner");
        write(&dst.join("thing"), "was a file");

        mirror_tree(&src, &dst).unwrap();
        assert!(dst.join("thing").is_dir());
        assert_eq!(fs::read_to_string(dst.join("thing/inner.txt")).unwrap(), "inner");
    }

    #[cfg(unix)]
    #[test]
    fn test_mirror_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("tool"), "#!/bin/sh");
        fs::set_permissions(src.join("tool"), fs::Permissions::from_mode(0o755)).unwrap();
        write(&dst.join("tool"), "#!/bin/sh");
        fs::set_permissions(dst.join("tool"), fs::Permissions::from_mode(0o644)).unwrap();

        mirror_tree(&src, &dst).unwrap();
        let mode = fs::metadata(dst.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_remove_path_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_path(&dir.path().join("nothing")).unwrap();
    }
}
