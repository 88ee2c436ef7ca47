//! Bazel option resolution
//!
//! Options are kept per build configuration (`Debug`, `Release`,
//! `Fastbuild`) plus an `all` bucket. User supplied options are layered on
//! top of the built-in ones and may not redefine an option that is already
//! present, with the exception of options Bazel itself accepts repeatedly.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::ALL_CONFIGS;

/// Build configurations the bridge knows how to map to Bazel flags.
pub const KNOWN_CONFIGS: &[&str] = &["Debug", "Release", "Fastbuild"];

/// Prefix of the configurations Xcode uses when building for testing.
pub const TEST_RUNNER_CONFIG_PREFIX: &str = "__XcbazelTestRunner_";

/// Options that may legitimately appear more than once on a command line.
const REPEATABLE_OPTIONS: &[&str] = &["--copt", "--config", "--define", "--objccopt"];

/// Result type for option resolution
pub type OptionsResult<T> = Result<T, OptionsError>;

/// Option resolution errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("{source_name} items conflict with common options: {}", names.join(","))]
    Conflict {
        source_name: String,
        names: Vec<String>,
    },

    #[error("Unknown build configuration \"{0}\"")]
    UnknownConfiguration(String),

    #[error(
        "Building test targets with configuration \"{0}\" is not allowed. \
         Please use the \"Test\" action or \"Build for\" > \"Testing\" instead."
    )]
    TestRunnerOnly(String),
}

impl OptionsError {
    pub fn exit_code(&self) -> i32 {
        match self {
            OptionsError::Conflict { .. } => 2,
            OptionsError::UnknownConfiguration(_) | OptionsError::TestRunnerOnly(_) => 1,
        }
    }
}

/// Apple platform family derived from Xcode's `PLATFORM_NAME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplePlatform {
    Ios,
    WatchOs,
    MacOs,
    TvOs,
}

impl ApplePlatform {
    /// `None` for platforms the bridge does not recognize.
    pub fn from_platform_name(platform_name: &str) -> Option<Self> {
        if platform_name.starts_with("watch") {
            Some(Self::WatchOs)
        } else if platform_name.starts_with("iphone") {
            Some(Self::Ios)
        } else if platform_name.starts_with("macos") {
            Some(Self::MacOs)
        } else if platform_name.starts_with("appletv") {
            Some(Self::TvOs)
        } else {
            None
        }
    }

    /// Name used in Bazel's CPU flags.
    pub fn config_name(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::WatchOs => "watchos",
            Self::MacOs => "darwin",
            Self::TvOs => "tvos",
        }
    }

    fn platform_type(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::WatchOs => "watchos",
            Self::MacOs => "macos",
            Self::TvOs => "tvos",
        }
    }

    fn sdk_version_flag(self) -> &'static str {
        match self {
            Self::Ios => "--ios_sdk_version",
            Self::WatchOs => "--watchos_sdk_version",
            Self::MacOs => "--macos_sdk_version",
            Self::TvOs => "--tvos_sdk_version",
        }
    }
}

/// Platform and CPU flags for `arch`.
///
/// macOS and iOS use `--cpu`; tvOS and watchOS use their `--<platform>_cpus`
/// flag. iOS builds also pick the watchOS CPU for bundled watch apps.
pub fn platform_flags(platform: ApplePlatform, arch: &str) -> Vec<String> {
    let config = platform.config_name();
    let mut flags = vec![format!("--apple_platform_type={}", platform.platform_type())];
    match platform {
        ApplePlatform::Ios | ApplePlatform::MacOs => flags.push(format!("--cpu={config}_{arch}")),
        ApplePlatform::WatchOs | ApplePlatform::TvOs => {
            flags.push(format!("--{config}_cpus={arch}"))
        }
    }
    if platform == ApplePlatform::Ios {
        let watch_cpu = if arch.starts_with("arm") { "armv7k" } else { "i386" };
        flags.push(format!("--watchos_cpus={watch_cpu}"));
    }
    flags
}

/// Convert `XCODE_VERSION_ACTUAL` (e.g. `1521`) to `15.2.1`.
///
/// The fix component is left out when zero.
pub fn xcode_version_string(reported: &str) -> Option<String> {
    let digits = reported.as_bytes();
    if digits.len() != 4 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let major: u32 = reported[..2].parse().ok()?;
    let minor: u32 = reported[2..3].parse().ok()?;
    let fix: u32 = reported[3..].parse().ok()?;
    Some(if fix == 0 {
        format!("{major}.{minor}")
    } else {
        format!("{major}.{minor}.{fix}")
    })
}

/// Map an Xcode `CONFIGURATION` to one of [`KNOWN_CONFIGS`].
pub fn resolve_configuration(configuration: &str, test_runner_only: bool) -> OptionsResult<String> {
    let resolved = match configuration.strip_prefix(TEST_RUNNER_CONFIG_PREFIX) {
        Some(inner) => inner,
        None if test_runner_only => {
            return Err(OptionsError::TestRunnerOnly(configuration.to_string()))
        }
        None => configuration,
    };
    if !KNOWN_CONFIGS.contains(&resolved) {
        return Err(OptionsError::UnknownConfiguration(resolved.to_string()));
    }
    Ok(resolved.to_string())
}

fn option_names(options: &[String]) -> BTreeSet<String> {
    options
        .iter()
        .map(|opt| opt.split_once('=').map_or(opt.as_str(), |(name, _)| name))
        .filter(|name| !REPEATABLE_OPTIONS.contains(name))
        .map(str::to_string)
        .collect()
}

fn find_conflicts(
    options: &BTreeMap<String, Vec<String>>,
    config: &str,
    new_options: &[String],
) -> Vec<String> {
    let new_names = option_names(new_options);
    let mut conflicts = BTreeSet::new();

    let mut buckets = vec![config];
    if config != ALL_CONFIGS {
        buckets.push(ALL_CONFIGS);
    }
    for bucket in buckets {
        if let Some(existing) = options.get(bucket) {
            conflicts.extend(option_names(existing).intersection(&new_names).cloned());
        }
    }
    conflicts.into_iter().collect()
}

fn add_default_option(options: &mut Vec<String>, option: &str, value: &str) {
    if !options.iter().any(|opt| opt.starts_with(option)) {
        options.push(format!("{option}={value}"));
    }
}

/// Startup and build options for every configuration of one invocation.
#[derive(Debug, Clone)]
pub struct BazelOptions {
    startup: BTreeMap<String, Vec<String>>,
    build: BTreeMap<String, Vec<String>>,
    platform: ApplePlatform,
    sdk_version: Option<String>,
    xcode_version: Option<String>,
}

impl BazelOptions {
    /// Built-in options for `platform`/`arch`.
    pub fn new(
        platform: ApplePlatform,
        arch: &str,
        sdk_version: Option<String>,
        xcode_version: Option<String>,
    ) -> Self {
        let to_vec = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut all = to_vec(&["--verbose_failures", "--announce_rc"]);
        all.extend(platform_flags(platform, arch));

        let build = BTreeMap::from([
            (ALL_CONFIGS.to_string(), all),
            ("Debug".to_string(), to_vec(&["--compilation_mode=dbg"])),
            (
                "Release".to_string(),
                to_vec(&["--compilation_mode=opt", "--strip=always"]),
            ),
            (
                "Fastbuild".to_string(),
                to_vec(&["--compilation_mode=fastbuild"]),
            ),
        ]);

        Self {
            startup: BTreeMap::new(),
            build,
            platform,
            sdk_version,
            xcode_version,
        }
    }

    /// Add user startup options for `config` (or [`ALL_CONFIGS`]).
    pub fn add_startup_options(&mut self, config: &str, items: Vec<String>) -> OptionsResult<()> {
        Self::add(&mut self.startup, "startup options", config, items)
    }

    /// Add user build options for `config` (or [`ALL_CONFIGS`]).
    pub fn add_build_options(&mut self, config: &str, items: Vec<String>) -> OptionsResult<()> {
        Self::add(&mut self.build, "build options", config, items)
    }

    fn add(
        options: &mut BTreeMap<String, Vec<String>>,
        kind: &str,
        config: &str,
        items: Vec<String>,
    ) -> OptionsResult<()> {
        let conflicts = find_conflicts(options, config, &items);
        if !conflicts.is_empty() {
            let source_name = if config == ALL_CONFIGS {
                kind.to_string()
            } else {
                format!("{kind}[{config}]")
            };
            return Err(OptionsError::Conflict {
                source_name,
                names: conflicts,
            });
        }
        options.entry(config.to_string()).or_default().extend(items);
        Ok(())
    }

    /// Map Bazel's source paths back to the workspace in debug info.
    pub fn add_debug_prefix_maps(&mut self, maps: &[(String, String)]) {
        let prefix_maps = maps
            .iter()
            .map(|(from, to)| format!("--copt=-fdebug-prefix-map={from}={to}"));
        self.build
            .entry(ALL_CONFIGS.to_string())
            .or_default()
            .extend(prefix_maps);
    }

    fn flattened(options: &BTreeMap<String, Vec<String>>, config: &str) -> Vec<String> {
        let mut flat = options.get(ALL_CONFIGS).cloned().unwrap_or_default();
        if config != ALL_CONFIGS {
            if let Some(specific) = options.get(config) {
                flat.extend(specific.iter().cloned());
            }
        }
        flat
    }

    pub fn startup_options(&self, config: &str) -> Vec<String> {
        Self::flattened(&self.startup, config)
    }

    /// Build options for `config`, with Xcode and SDK versions defaulted in.
    pub fn build_options(&self, config: &str) -> Vec<String> {
        let mut options = Self::flattened(&self.build, config);
        if let Some(version) = &self.xcode_version {
            add_default_option(&mut options, "--xcode_version", version);
        }
        if let Some(sdk) = &self.sdk_version {
            add_default_option(&mut options, self.platform.sdk_version_flag(), sdk);
        }
        options
    }
}
