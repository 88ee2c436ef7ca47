//! `.ipa`/`.zip` artifacts
//!
//! rules_apple ships bundles inside archives. Next to the archive it may also
//! leave an unpacked copy (`archive_root`); when that copy is newer than the
//! archive's `<stem>.unprocessed.<ext>` sentinel it is mirrored instead of
//! extracting the archive again.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, trace};

use crate::report::Diagnostics;

/// Errors from archive handling
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Generated archive not found at \"{0}\"")]
    Missing(PathBuf),

    #[error("Failed to read archive \"{path}\": {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to create target path \"{path}\" during extraction. {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to extract \"{path}\": {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ArchiveError::Missing(_) => 670,
            _ => 671,
        }
    }
}

/// Result type for archive handling
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Whether `path` names an archive artifact.
pub fn is_archive(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ipa") | Some("zip")
    )
}

/// Where the bundle sits inside an archive and how many leading path
/// components to drop when extracting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub subpath: String,
    pub strip_components: usize,
}

impl ArchiveLayout {
    /// `.ipa` files nest the bundle under `Payload/`, except for macOS
    /// bundles, which test rules also ship as `.ipa`.
    pub fn for_archive(archive: &Path, bundle: &str, is_macos: bool) -> Self {
        let is_ipa = archive.extension().is_some_and(|e| e == "ipa");
        if is_ipa && !is_macos {
            Self {
                subpath: format!("Payload/{bundle}"),
                strip_components: 2,
            }
        } else {
            Self {
                subpath: bundle.to_string(),
                strip_components: 1,
            }
        }
    }
}

/// `<dir>/<stem>.unprocessed.<ext>` next to `archive`.
pub fn sentinel_path(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match archive.extension() {
        Some(ext) => format!("{stem}.unprocessed.{}", ext.to_string_lossy()),
        None => format!("{stem}.unprocessed"),
    };
    archive.with_file_name(name)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether `archive_root` is strictly newer than the archive's sentinel.
///
/// A missing root or missing sentinel means the archive must be extracted.
pub fn archive_root_is_fresh(archive_root: &Path, archive: &Path) -> bool {
    match (modified(archive_root), modified(&sentinel_path(archive))) {
        (Some(root), Some(sentinel)) => root > sentinel,
        _ => false,
    }
}

fn is_support_dir(name: &str) -> bool {
    let top = name.split('/').next().unwrap_or("");
    top.ends_with("Support") || top.ends_with("Support2")
}

fn stripped_path(name: &str, strip: usize) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for part in name.split('/').filter(|p| !p.is_empty()).skip(strip) {
        let part = Path::new(part);
        if !matches!(part.components().next(), Some(Component::Normal(_))) {
            return None;
        }
        rel.push(part);
    }
    Some(rel)
}

fn write_entry(reader: &mut impl io::Read, target: &Path, mode: Option<u32>) -> io::Result<()> {
    let mut out = File::create(target)?;
    io::copy(reader, &mut out)?;
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// Extract the bundle in `archive` into `dest`.
///
/// Returns the number of files written.
pub fn extract(
    archive: &Path,
    dest: &Path,
    layout: &ArchiveLayout,
    diag: &mut dyn Diagnostics,
) -> ArchiveResult<usize> {
    if !archive.is_file() {
        return Err(ArchiveError::Missing(archive.to_path_buf()));
    }
    let read_err = |source| ArchiveError::Read {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(|e| read_err(e.into()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(read_err)?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(read_err)?;
        let name = entry.name().to_string();

        if is_support_dir(&name) || name.len() < layout.subpath.len() {
            continue;
        }
        if !name.starts_with(&layout.subpath) {
            diag.warning(&format!(
                "Mismatched extraction path. Archive content at \"{name}\" expected to have subpath of \"{}\"",
                layout.subpath
            ));
        }
        let Some(rel) = stripped_path(&name, layout.strip_components) else {
            diag.warning(&format!("Skipping archive entry with unsafe path \"{name}\""));
            continue;
        };
        let target = dest.join(rel);
        let mode = entry.unix_mode().map(|m| m & 0o777).filter(|m| *m != 0);
        trace!(entry = %name, mode = ?mode, "extracting");

        let target_dir = if entry.is_dir() {
            target.as_path()
        } else {
            target.parent().unwrap_or(dest)
        };
        fs::create_dir_all(target_dir).map_err(|source| ArchiveError::CreateDir {
            path: target.clone(),
            source,
        })?;
        if entry.is_dir() {
            continue;
        }

        write_entry(&mut entry, &target, mode).map_err(|source| ArchiveError::Write {
            path: target.clone(),
            source,
        })?;
        written += 1;
    }

    debug!(archive = %archive.display(), dest = %dest.display(), written, "extracted archive");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CapturedDiagnostics;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn make_zip(path: &Path, entries: &[(&str, &str, u32)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, contents, mode) in entries {
            let options = SimpleFileOptions::default().unix_permissions(*mode);
            if name.ends_with('/') {
                writer.add_directory(name.trim_end_matches('/'), options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_layout() {
        let ipa = ArchiveLayout::for_archive(Path::new("/b/App.ipa"), "App.app", false);
        assert_eq!(ipa.subpath, "Payload/App.app");
        assert_eq!(ipa.strip_components, 2);

        let mac = ArchiveLayout::for_archive(Path::new("/b/Tests.ipa"), "Tests.xctest", true);
        assert_eq!(mac.subpath, "Tests.xctest");
        assert_eq!(mac.strip_components, 1);

        let zip = ArchiveLayout::for_archive(Path::new("/b/Kit.zip"), "Kit.framework", false);
        assert_eq!(zip.strip_components, 1);
    }

    #[test]
    fn test_sentinel_path() {
        assert_eq!(
            sentinel_path(Path::new("/bin/app/App.ipa")),
            PathBuf::from("/bin/app/App.unprocessed.ipa")
        );
    }

    #[test]
    fn test_freshness() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("App.ipa");
        let root = dir.path().join("App_archive-root");
        fs::create_dir(&root).unwrap();

        // No sentinel: extract.
        assert!(!archive_root_is_fresh(&root, &archive));

        let sentinel = sentinel_path(&archive);
        fs::write(&sentinel, "").unwrap();
        let old = SystemTime::now() - std::time::Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&sentinel)
            .unwrap()
            .set_modified(old)
            .unwrap();
        assert!(archive_root_is_fresh(&root, &archive));

        let newer = SystemTime::now() + std::time::Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&sentinel)
            .unwrap()
            .set_modified(newer)
            .unwrap();
        assert!(!archive_root_is_fresh(&root, &archive));
    }

    #[test]
    fn test_extract_ipa() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("App.ipa");
        make_zip(
            &archive,
            &[
                ("Payload/", "", 0o755),
                ("Payload/App.app/", "", 0o755),
                ("Payload/App.app/App", "binary", 0o755),
                ("Payload/App.app/Info.plist", "plist", 0o644),
                ("Payload/App.app/PlugIns/W.appex/W", "ext", 0o755),
                ("SwiftSupport/iphoneos/libswiftCore.dylib", "swift", 0o644),
            ],
        );

        let dest = dir.path().join("out/App.app");
        let layout = ArchiveLayout::for_archive(&archive, "App.app", false);
        let mut diag = CapturedDiagnostics::default();
        let written = extract(&archive, &dest, &layout, &mut diag).unwrap();

        assert_eq!(written, 3);
        assert_eq!(fs::read_to_string(dest.join("App")).unwrap(), "binary");
        assert_eq!(fs::read_to_string(dest.join("PlugIns/W.appex/W")).unwrap(), "ext");
        assert!(!dir.path().join("out/libswiftCore.dylib").exists());
        assert!(diag.warnings.is_empty());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("App")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_extract_warns_on_mismatched_subpath() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Kit.zip");
        make_zip(&archive, &[("Other.framework/Other", "x", 0o644)]);

        let dest = dir.path().join("Kit.framework");
        let layout = ArchiveLayout::for_archive(&archive, "Kit.framework", false);
        let mut diag = CapturedDiagnostics::default();
        extract(&archive, &dest, &layout, &mut diag).unwrap();

        assert_eq!(diag.warnings.len(), 1);
        assert!(dest.join("Other").exists());
    }

    #[test]
    fn test_missing_archive() {
        let dir = TempDir::new().unwrap();
        let mut diag = CapturedDiagnostics::default();
        let layout = ArchiveLayout::for_archive(Path::new("x.zip"), "X.app", false);
        let err = extract(&dir.path().join("x.zip"), dir.path(), &layout, &mut diag).unwrap_err();
        assert_eq!(err.exit_code(), 670);
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bad.zip");
        fs::write(&archive, "not a zip").unwrap();
        let mut diag = CapturedDiagnostics::default();
        let layout = ArchiveLayout::for_archive(&archive, "X.app", false);
        let err = extract(&archive, dir.path(), &layout, &mut diag).unwrap_err();
        assert_eq!(err.exit_code(), 671);
    }
}
