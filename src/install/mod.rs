//! Installing Bazel outputs where Xcode expects them
//!
//! Bazel produces a bundle, a plain file or an archive; Xcode wants the
//! product at `TARGET_BUILD_DIR/FULL_PRODUCT_NAME`, embedded bundles next to
//! it in `BUILT_PRODUCTS_DIR` and dSYMs there as well.

pub mod archive;
pub mod dsym;
pub mod embedded;
pub mod sync;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::XcodeEnv;
use crate::descriptor::{DescriptorError, OutputDescriptor};
use crate::report::{Diagnostics, Timer};

pub use archive::{archive_root_is_fresh, is_archive, sentinel_path, ArchiveError, ArchiveLayout};
pub use dsym::{dsym_names, dsym_uuids, parse_dwarfdump_uuids, DsymError, DsymSlice};
pub use embedded::{conventional_subfolder, find_embedded_bundle};
pub use sync::{copy_file, copy_tree, mirror_tree, remove_path, SyncError, SyncStats};

/// Install errors
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("Failed to remove stale output \"{path}\". {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Copy of \"{src}\" to \"{dst}\" failed. {reason}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl InstallError {
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallError::Descriptor(e) => e.exit_code(),
            InstallError::RemoveStale { .. } => 600,
            InstallError::Copy { .. } => 650,
            InstallError::Archive(e) => e.exit_code(),
        }
    }
}

/// Result type for installation
pub type InstallResult<T> = Result<T, InstallError>;

/// How the primary artifact reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMethod {
    /// Archive root mirrored because it was fresher than the archive.
    MirroredArchiveRoot,
    Extracted,
    CopiedFile,
    CopiedTree,
}

/// Result of installing the primary artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    /// Bazel's product name: the artifact's file name without extension.
    pub product_name: String,
    /// The artifact Bazel built.
    pub source: PathBuf,
    pub destination: PathBuf,
    pub method: InstallMethod,
}

/// Places Bazel outputs into Xcode's build directories.
#[derive(Debug)]
pub struct ArtifactInstaller<'a> {
    env: &'a XcodeEnv,
    /// `bazel-bin/<XCBAZEL_BUILD_PATH>`, where dSYMs are looked up.
    build_dir: PathBuf,
}

impl<'a> ArtifactInstaller<'a> {
    pub fn new(env: &'a XcodeEnv, build_dir: PathBuf) -> Self {
        Self { env, build_dir }
    }

    fn expected_bundle_name(&self, descriptor: &OutputDescriptor, product_name: &str) -> String {
        match &descriptor.bundle_name {
            Some(name) => {
                let ext = descriptor
                    .bundle_extension
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .unwrap_or(&self.env.wrapper_suffix);
                format!("{name}{ext}")
            }
            None => format!("{product_name}{}", self.env.wrapper_suffix),
        }
    }

    fn remove_stale(path: &Path) -> InstallResult<()> {
        remove_path(path).map_err(|source| InstallError::RemoveStale {
            path: path.to_path_buf(),
            source,
        })
    }

    fn copy_err(src: &Path, dst: &Path, reason: impl ToString) -> InstallError {
        InstallError::Copy {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Install the artifact described by `descriptor` at the location Xcode
    /// expects for the current target.
    pub fn install_primary(
        &self,
        descriptor: &OutputDescriptor,
        descriptor_path: &Path,
        diag: &mut dyn Diagnostics,
    ) -> InstallResult<InstalledArtifact> {
        let timer = Timer::start("Installing artifacts");
        let destination = self.env.artifact_output_path();
        let artifact = descriptor
            .artifact()
            .ok_or_else(|| DescriptorError::MissingArtifact(descriptor_path.to_path_buf()))?;
        let product_name = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let method = if is_archive(artifact) {
            self.install_archive(descriptor, artifact, &product_name, &destination, diag)?
        } else if artifact.is_file() {
            Self::remove_stale(&destination)?;
            copy_file(artifact, &destination)
                .map_err(|e| Self::copy_err(artifact, &destination, e))?;
            InstallMethod::CopiedFile
        } else {
            Self::remove_stale(&destination)?;
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Self::copy_err(artifact, &destination, e))?;
            }
            copy_tree(artifact, &destination)
                .map_err(|e| Self::copy_err(artifact, &destination, e))?;
            InstallMethod::CopiedTree
        };

        info!(
            artifact = %artifact.display(),
            destination = %destination.display(),
            ?method,
            "installed primary artifact"
        );
        timer.end();
        Ok(InstalledArtifact {
            product_name,
            source: artifact.to_path_buf(),
            destination,
            method,
        })
    }

    fn install_archive(
        &self,
        descriptor: &OutputDescriptor,
        archive: &Path,
        product_name: &str,
        destination: &Path,
        diag: &mut dyn Diagnostics,
    ) -> InstallResult<InstallMethod> {
        let bundle = self.expected_bundle_name(descriptor, product_name);

        if let Some(root) = &descriptor.archive_root {
            let unpacked = root.join(&bundle);
            if unpacked.is_dir() && archive_root_is_fresh(root, archive) {
                debug!(source = %unpacked.display(), "archive root is fresh, mirroring");
                mirror_tree(&unpacked, destination)
                    .map_err(|e| Self::copy_err(&unpacked, destination, e))?;
                return Ok(InstallMethod::MirroredArchiveRoot);
            }
        }

        if !archive.is_file() {
            return Err(ArchiveError::Missing(archive.to_path_buf()).into());
        }
        Self::remove_stale(destination)?;
        let layout = ArchiveLayout::for_archive(archive, &bundle, self.env.is_macos());
        archive::extract(archive, destination, &layout, diag)?;
        Ok(InstallMethod::Extracted)
    }

    /// Copy embedded bundles to the top of `BUILT_PRODUCTS_DIR` so
    /// Instruments can find their symbols. Problems are only warnings.
    pub fn install_embedded_bundles(
        &self,
        descriptor: &OutputDescriptor,
        installed: &InstalledArtifact,
        diag: &mut dyn Diagnostics,
    ) -> Vec<PathBuf> {
        if !self.env.collect_dsym || self.env.is_simulator() {
            return Vec::new();
        }
        if descriptor.embedded_bundles.is_empty() {
            return Vec::new();
        }

        let timer = Timer::start("Installing embedded bundles");
        let mut installed_paths = Vec::new();
        for bundle in &descriptor.embedded_bundles {
            let name = bundle.full_name();
            let output = self.env.built_products_dir.join(&name);

            let from_archive_root = bundle
                .archive_root
                .as_ref()
                .map(|root| root.join(&name))
                .filter(|p| p.is_dir());
            let source = from_archive_root.or_else(|| {
                find_embedded_bundle(&installed.destination, &name, bundle.extension())
            });
            let Some(source) = source else {
                diag.warning(&format!(
                    "Could not find embedded bundle \"{name}\"; profiling may not be able to symbolicate it"
                ));
                continue;
            };

            match mirror_tree(&source, &output) {
                Ok(_) => installed_paths.push(output),
                Err(e) => diag.warning(&format!(
                    "Failed to install embedded bundle \"{name}\": {e}"
                )),
            }
        }
        timer.end();
        installed_paths
    }

    /// Copy every dSYM Xcode should see into `BUILT_PRODUCTS_DIR`.
    ///
    /// Returns the installed dSYM paths. Each bundle is independent; failures
    /// are warnings.
    pub fn install_dsyms(
        &self,
        descriptors: &[OutputDescriptor],
        artifact: &Path,
        diag: &mut dyn Diagnostics,
    ) -> Vec<PathBuf> {
        let Some(primary) = self.env.dwarf_dsym_file_name.as_deref() else {
            return Vec::new();
        };
        if !self.env.generate_dsym {
            return Vec::new();
        }

        let timer = Timer::start("Installing dSYM bundles");
        let mut installed = Vec::new();
        for name in dsym_names(primary, descriptors, self.env.collect_dsym) {
            let candidates = [
                artifact.parent().map(|dir| dir.join(&name)),
                Some(self.build_dir.join(&name)),
            ];
            let Some(source) = candidates.into_iter().flatten().find(|p| p.is_dir()) else {
                diag.warning(&format!("Could not find a dSYM bundle named \"{name}\""));
                continue;
            };

            let output = self.env.built_products_dir.join(&name);
            match mirror_tree(&source, &output) {
                Ok(_) => installed.push(output),
                Err(e) => diag.warning(
                    &DsymError::Install {
                        name: name.clone(),
                        reason: e.to_string(),
                    }
                    .to_string(),
                ),
            }
        }
        timer.end();
        installed
    }
}
