//! Bridge driver
//!
//! Runs one Xcode build phase end to end:
//! - Resolve Bazel options for the Xcode configuration
//! - Run the build and collect output descriptors from its event stream
//! - Link the Bazel workspace next to the Xcode project
//! - Install the primary artifact, embedded bundles, headers and dSYMs
//! - Re-sign test artifacts and update the debugger's source map
//!
//! Every step returns a `Result`; only [`BridgeError::exit_code`] decides
//! what the build phase reports to Xcode.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::{
    event_file_path, query_execution_root, source_maps, BuildError, BuildOrchestrator,
    BuildRequest, OutputPatcher,
};
use crate::config::{BridgeConfig, ConfigError, XcodeEnv, ALL_CONFIGS};
use crate::descriptor::{DescriptorError, OutputDescriptor};
use crate::genfiles::install_generated_headers;
use crate::install::{dsym_uuids, ArtifactInstaller, InstallError, InstalledArtifact};
use crate::lock::LockError;
use crate::options::{
    resolve_configuration, xcode_version_string, ApplePlatform, BazelOptions, OptionsError,
};
use crate::process::CommandRunner;
use crate::remap::DebugPathRemapper;
use crate::report::{Diagnostics, Timer};
use crate::signing::{SigningCoordinator, SigningError};
use crate::symbol_cache::{SymbolCache, SymbolCacheEntry, SymbolCacheError};

/// Name of the link to the Bazel workspace created in `XCBAZEL_WR`.
pub const WORKSPACE_LINK: &str = "xcbazel-workspace";

/// Exit code for `bazel-bin` and workspace link failures.
pub const EXIT_CODE_WORKSPACE: i32 = 20;

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("build lock: {0}")]
    Lock(#[from] LockError),

    #[error("invalid project path pattern: {0}")]
    Pattern(#[from] regex_lite::Error),

    #[error("failed to update lldbinit: {0}")]
    Lldbinit(#[source] io::Error),

    #[error(transparent)]
    SymbolCache(#[from] SymbolCacheError),

    #[error("failed to prepare bazel-bin at {path}: {source}")]
    BazelBin {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to link {link} to the Bazel workspace: {source}")]
    WorkspaceLink {
        link: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BridgeError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) => 1,
            BridgeError::Options(e) => e.exit_code(),
            BridgeError::Build(e) => e.exit_code(),
            BridgeError::Descriptor(e) => e.exit_code(),
            BridgeError::Install(e) => e.exit_code(),
            BridgeError::Signing(e) => e.exit_code(),
            BridgeError::Lock(_) => 1,
            BridgeError::Pattern(_) => 1,
            BridgeError::Lldbinit(_) => 1,
            BridgeError::SymbolCache(_) => 1,
            BridgeError::BazelBin { .. } => EXIT_CODE_WORKSPACE,
            BridgeError::WorkspaceLink { .. } => EXIT_CODE_WORKSPACE,
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// What the `build` subcommand was asked to do.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    /// Bazel client to run.
    pub bazel: PathBuf,

    /// `bazel-bin` convenience link, relative to the directory Xcode runs
    /// the script from unless absolute.
    pub bazel_bin_path: PathBuf,

    /// Bazel labels to build.
    pub targets: Vec<String>,

    /// Copy outputs into Xcode's build directories after the build.
    pub install_generated_artifacts: bool,

    /// Extra startup options for every configuration.
    pub startup_options: Vec<String>,

    /// Extra build options for every configuration.
    pub build_options: Vec<String>,
}

impl BuildInvocation {
    pub fn new(bazel: impl Into<PathBuf>, targets: Vec<String>) -> Self {
        Self {
            bazel: bazel.into(),
            bazel_bin_path: PathBuf::from("bazel-bin"),
            targets,
            install_generated_artifacts: false,
            startup_options: Vec::new(),
            build_options: Vec::new(),
        }
    }
}

/// What one bridge run did.
#[derive(Debug, Default)]
pub struct BridgeReport {
    /// The Xcode action was not `build`; nothing ran.
    pub skipped: bool,
    pub descriptors: Vec<PathBuf>,
    /// `bazel-bin` realpath minus `bazel-out/<config>/bin`.
    pub bazel_workspace_root: Option<PathBuf>,
    pub installed: Option<InstalledArtifact>,
    pub embedded_bundles: Vec<PathBuf>,
    pub generated_headers: usize,
    pub dsyms: Vec<PathBuf>,
}

/// Runs one build phase for the target described by an [`XcodeEnv`].
pub struct Bridge<'a> {
    config: &'a BridgeConfig,
    env: &'a XcodeEnv,
    runner: &'a dyn CommandRunner,
    symbol_cache: &'a dyn SymbolCache,
    remapper: DebugPathRemapper,
}

impl<'a> Bridge<'a> {
    pub fn new(
        config: &'a BridgeConfig,
        env: &'a XcodeEnv,
        runner: &'a dyn CommandRunner,
        symbol_cache: &'a dyn SymbolCache,
        home: PathBuf,
    ) -> Self {
        let remapper = DebugPathRemapper::new(
            home,
            config.lldbinit_path.clone(),
            config.lldbinit_epilogue_path.clone(),
        );
        Self {
            config,
            env,
            runner,
            symbol_cache,
            remapper,
        }
    }

    /// Run every step for `invocation`.
    pub fn run(
        &self,
        invocation: &BuildInvocation,
        diag: &mut dyn Diagnostics,
    ) -> BridgeResult<BridgeReport> {
        let mut report = BridgeReport::default();
        if self.env.action != "build" {
            info!(action = %self.env.action, "ignoring non-build action");
            report.skipped = true;
            return Ok(report);
        }

        let configuration = resolve_configuration(&self.env.configuration, self.env.test_runner_only)?;
        let mut options = self.resolve_options(invocation, diag)?;

        let mut maps = None;
        if self.env.use_debug_prefix_map {
            let found = self.source_maps(invocation, diag);
            options.add_debug_prefix_maps(&found);
            maps = Some(found);
        }

        report.descriptors = self.build(invocation, &options, &configuration, diag)?;

        report.bazel_workspace_root = self.prepare_bazel_bin(invocation, diag)?;
        if let Some(root) = &report.bazel_workspace_root {
            self.link_workspace(root)?;
        }

        if invocation.install_generated_artifacts {
            self.install(invocation, &mut report, &mut maps, diag)?;
        }

        if !self.env.is_watch_app() {
            self.update_lldbinit(invocation, &mut maps, diag);
        }
        Ok(report)
    }

    /// Built-in options plus those from config files and the command line.
    fn resolve_options(
        &self,
        invocation: &BuildInvocation,
        diag: &mut dyn Diagnostics,
    ) -> BridgeResult<BazelOptions> {
        let platform = match ApplePlatform::from_platform_name(&self.env.platform_name) {
            Some(platform) => platform,
            None => {
                diag.warning(&format!(
                    "Unknown platform {:?}, building for iOS.",
                    self.env.platform_name
                ));
                ApplePlatform::Ios
            }
        };
        let xcode_version = self
            .env
            .xcode_version_actual
            .as_deref()
            .and_then(xcode_version_string);
        let mut options = BazelOptions::new(
            platform,
            &self.env.current_arch,
            self.env.sdk_version.clone(),
            xcode_version,
        );

        // `all` first so per-configuration lists are checked against it.
        for (config, items) in ordered_tables(&self.config.startup_options) {
            options.add_startup_options(config, items.clone())?;
        }
        for (config, items) in ordered_tables(&self.config.build_options) {
            options.add_build_options(config, items.clone())?;
        }
        if !invocation.startup_options.is_empty() {
            options.add_startup_options(ALL_CONFIGS, invocation.startup_options.clone())?;
        }
        if !invocation.build_options.is_empty() {
            options.add_build_options(ALL_CONFIGS, invocation.build_options.clone())?;
        }
        Ok(options)
    }

    fn source_maps(
        &self,
        invocation: &BuildInvocation,
        diag: &mut dyn Diagnostics,
    ) -> Vec<(String, String)> {
        let execroot = query_execution_root(self.runner, &invocation.bazel, diag);
        source_maps(execroot.as_deref(), &self.env.workspace_root)
    }

    fn build(
        &self,
        invocation: &BuildInvocation,
        options: &BazelOptions,
        configuration: &str,
        diag: &mut dyn Diagnostics,
    ) -> BridgeResult<Vec<PathBuf>> {
        let event_file = event_file_path(&self.env.project_state_dir());
        let request = BuildRequest {
            bazel: invocation.bazel.clone(),
            startup_options: options.startup_options(configuration),
            build_options: options.build_options(configuration),
            event_file: event_file.clone(),
            output_group: self.config.output_group.clone(),
            aspect: self.config.aspect.clone(),
            tool_tag: self.config.tool_tag.clone(),
            generate_dsym: self.env.generate_dsym,
            collect_dsym: self.env.collect_dsym,
            targets: invocation.targets.clone(),
        };

        let patcher = OutputPatcher::new(&self.env.project_dir, &self.env.main_group_path)?;
        let mut orchestrator = BuildOrchestrator::new(
            event_file,
            self.config.descriptor_suffix.clone(),
            Duration::from_millis(self.config.poll_interval_ms),
            patcher,
        );
        let outcome = orchestrator.run(&request.command_line(), diag)?;
        if !outcome.complete {
            debug!(events = outcome.events, "event stream ended before the build tree resolved");
        }
        Ok(outcome.descriptors)
    }

    fn bazel_bin(&self, invocation: &BuildInvocation) -> PathBuf {
        if invocation.bazel_bin_path.is_absolute() {
            invocation.bazel_bin_path.clone()
        } else {
            self.env.main_group_path.join(&invocation.bazel_bin_path)
        }
    }

    /// Make sure `bazel-bin` resolves to a directory and derive the Bazel
    /// workspace root from it.
    ///
    /// A missing `bazel-bin` is only a warning; a dangling link gets its
    /// target created.
    fn prepare_bazel_bin(
        &self,
        invocation: &BuildInvocation,
        diag: &mut dyn Diagnostics,
    ) -> BridgeResult<Option<PathBuf>> {
        let bazel_bin = self.bazel_bin(invocation);
        if !bazel_bin.is_dir() {
            let Ok(target) = fs::read_link(&bazel_bin) else {
                diag.warning(&format!(
                    "Unable to resolve bazel-bin directory {}",
                    bazel_bin.display()
                ));
                return Ok(None);
            };
            let target = match bazel_bin.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            };
            fs::create_dir_all(&target).map_err(|source| BridgeError::BazelBin {
                path: target.clone(),
                source,
            })?;
        }

        let real = fs::canonicalize(&bazel_bin).map_err(|source| BridgeError::BazelBin {
            path: bazel_bin.clone(),
            source,
        })?;
        Ok(Some(bazel_workspace_root(&real, diag)))
    }

    /// Point `<XCBAZEL_WR>/xcbazel-workspace` at the Bazel workspace root.
    fn link_workspace(&self, bazel_workspace_root: &Path) -> BridgeResult<()> {
        let link = self.env.workspace_root.join(WORKSPACE_LINK);
        let relink = || -> io::Result<()> {
            if fs::symlink_metadata(&link).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(&link)?;
            }
            symlink(bazel_workspace_root, &link)
        };
        relink().map_err(|source| BridgeError::WorkspaceLink {
            link: link.clone(),
            source,
        })?;
        debug!(link = %link.display(), target = %bazel_workspace_root.display(), "linked workspace");
        Ok(())
    }

    fn install(
        &self,
        invocation: &BuildInvocation,
        report: &mut BridgeReport,
        maps: &mut Option<Vec<(String, String)>>,
        diag: &mut dyn Diagnostics,
    ) -> BridgeResult<()> {
        let descriptors = OutputDescriptor::load_all(&report.descriptors)?;
        let (Some(primary), Some(primary_path)) = (descriptors.first(), report.descriptors.first())
        else {
            return Ok(());
        };

        let build_dir = self.bazel_bin(invocation).join(&self.env.build_path);
        let installer = ArtifactInstaller::new(self.env, build_dir);
        let headers_root = report.bazel_workspace_root.as_deref();
        let all_descriptors = &descriptors;

        let (installed, headers) = thread::scope(|scope| {
            let headers = headers_root.map(|root| {
                scope.spawn(move || {
                    let timer = Timer::start("Installing generated headers");
                    let result = install_generated_headers(root, all_descriptors);
                    timer.end();
                    result
                })
            });

            let installed = installer
                .install_primary(primary, primary_path, diag)
                .map(|installed| {
                    let embedded = installer.install_embedded_bundles(primary, &installed, diag);
                    (installed, embedded)
                });
            (installed, headers.map(|handle| handle.join()))
        });

        match headers {
            Some(Ok(Ok(count))) => report.generated_headers = count,
            Some(Ok(Err(e))) => diag.warning(&format!("Installing generated headers failed: {e}")),
            Some(Err(_)) => diag.warning("Installing generated headers failed unexpectedly"),
            None => {}
        }
        let (installed, embedded) = installed?;
        report.embedded_bundles = embedded;

        report.dsyms = installer.install_dsyms(&descriptors, &installed.source, diag);
        if !report.dsyms.is_empty() {
            let maps = maps.get_or_insert_with(|| self.source_maps(invocation, diag));
            self.index_dsyms(&report.dsyms, maps, diag);
        }

        SigningCoordinator::new(self.runner).resign_test_artifacts(self.env, &installed.product_name)?;
        report.installed = Some(installed);
        Ok(())
    }

    /// Record every dSYM slice in the symbol cache and embed the source
    /// mappings. Failures only cost debuggability, so they are warnings.
    fn index_dsyms(&self, dsyms: &[PathBuf], maps: &[(String, String)], diag: &mut dyn Diagnostics) {
        let timer = Timer::start("Patching dSYM source file paths");
        for dsym in dsyms {
            let slices = match dsym_uuids(self.runner, dsym) {
                Ok(slices) => slices,
                Err(e) => {
                    diag.warning(&e.to_string());
                    continue;
                }
            };
            for slice in &slices {
                let entry = SymbolCacheEntry::new(&slice.uuid, dsym, &slice.architecture);
                if let Err(e) = self.symbol_cache.upsert(entry) {
                    diag.warning(&format!("Failed to cache dSYM {}: {e}", dsym.display()));
                }
            }
            if let Err(e) = self.remapper.remap_dsym(dsym, &slices, maps) {
                diag.warning(&format!(
                    "Failed to write source path remappings into {}: {e}",
                    dsym.display()
                ));
            }
        }
        timer.end();
    }

    fn update_lldbinit(
        &self,
        invocation: &BuildInvocation,
        maps: &mut Option<Vec<(String, String)>>,
        diag: &mut dyn Diagnostics,
    ) {
        let timer = Timer::start("Updating .lldbinit");
        let clear = self.env.generate_dsym || self.env.use_debug_prefix_map;
        let maps: &[(String, String)] = if clear {
            &[]
        } else {
            maps.get_or_insert_with(|| self.source_maps(invocation, diag))
                .as_slice()
        };
        let project_name = self
            .env
            .project_file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Err(e) = self.remapper.update_lldbinit(clear, maps, &project_name, diag) {
            warn!(error = %e, "lldbinit update failed");
            diag.warning(&format!("Updating .lldbinit action failed: {e}"));
        }
        timer.end();
    }
}

/// Option tables with [`ALL_CONFIGS`] first, then configurations by name.
fn ordered_tables(
    tables: &BTreeMap<String, Vec<String>>,
) -> impl Iterator<Item = (&str, &Vec<String>)> {
    let all = tables.get_key_value(ALL_CONFIGS);
    let rest = tables.iter().filter(|(config, _)| config.as_str() != ALL_CONFIGS);
    all.into_iter()
        .chain(rest)
        .map(|(config, items)| (config.as_str(), items))
}

/// `bazel-bin` resolves to `<output base>/execroot/<ws>/bazel-out/<config>/bin`;
/// the build workspace root is that path minus its last three components.
pub fn bazel_workspace_root(bazel_bin_realpath: &Path, diag: &mut dyn Diagnostics) -> PathBuf {
    if bazel_bin_realpath.components().count() < 5 {
        diag.warning(&format!(
            "Unexpected bazel-bin path {}; the derived workspace root may be wrong.",
            bazel_bin_realpath.display()
        ));
    }
    bazel_bin_realpath
        .ancestors()
        .nth(3)
        .unwrap_or(bazel_bin_realpath)
        .to_path_buf()
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink(_src: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "workspace links need a unix host",
    ))
}
