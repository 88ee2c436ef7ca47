//! Xcode build settings
//!
//! Xcode exports its build settings as environment variables when it runs a
//! build phase script. The bridge reads them once, up front, into
//! [`XcodeEnv`]; nothing else in the crate touches the process environment.

use std::collections::HashMap;
use std::path::PathBuf;

use super::effective::ConfigError;

/// Xcode product type of watchOS 2+ applications.
pub const WATCH_APP2_PRODUCT_TYPE: &str = "com.apple.product-type.application.watchapp2";

/// Snapshot of the build settings the bridge consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct XcodeEnv {
    /// Xcode build action; an empty `ACTION` means `build`.
    pub action: String,
    pub configuration: String,
    pub codesigning_folder_path: PathBuf,
    /// Where Xcode looks for built products (and dSYMs).
    pub built_products_dir: PathBuf,
    pub target_build_dir: PathBuf,
    /// E.g. `MyApp.app` or `libFoo.a`.
    pub full_product_name: String,
    pub executable_path: Option<String>,
    pub wrapper_suffix: String,
    pub wrapper_extension: Option<String>,
    pub platform_name: String,
    pub product_type: String,
    pub project_dir: PathBuf,
    /// Path to the `.xcodeproj` bundle.
    pub project_file_path: PathBuf,
    pub sdk_version: Option<String>,
    /// Test host binary for unit test bundles.
    pub test_host: Option<PathBuf>,
    pub derived_sources_dir: Option<PathBuf>,
    pub dwarf_dsym_file_name: Option<String>,
    pub current_arch: String,
    /// `CODE_SIGNING_ALLOWED=YES` and not building for a simulator.
    pub code_signing_allowed: bool,
    pub xcode_version_actual: Option<String>,
    /// Directory holding the Bazel WORKSPACE (`XCBAZEL_WR`).
    pub workspace_root: PathBuf,
    /// Subpath of `bazel-bin` holding dSYMs (`XCBAZEL_BUILD_PATH`).
    pub build_path: String,
    /// `XCBAZEL_USE_DSYM`, default `NO`.
    pub generate_dsym: bool,
    /// `XCBAZEL_DEBUG_PREFIX_MAP`, default `YES`.
    pub use_debug_prefix_map: bool,
    /// `XCBAZEL_COLLECT_DSYM`, default `YES`.
    pub collect_dsym: bool,
    /// `XCBAZEL_QUEUE_BUILDS`, default `YES`.
    pub queue_builds: bool,
    /// `XCBAZEL_TEST_RUNNER_ONLY`, default `NO`.
    pub test_runner_only: bool,
    /// Directory Xcode ran the script from; the project's main group.
    pub main_group_path: PathBuf,
}

/// The Xcode action named by `vars`, with the empty string meaning `build`.
pub fn xcode_action(vars: &HashMap<String, String>) -> String {
    match vars.get("ACTION").map(String::as_str) {
        None | Some("") => "build".to_string(),
        Some(action) => action.to_string(),
    }
}

struct Vars<'a>(&'a HashMap<String, String>);

impl Vars<'_> {
    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        match self.0.get(name) {
            Some(value) => value == "YES",
            None => default,
        }
    }
}

impl XcodeEnv {
    /// Read the current process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let cwd = std::env::current_dir().map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_vars(&vars, cwd)
    }

    pub fn from_vars(
        vars: &HashMap<String, String>,
        main_group_path: PathBuf,
    ) -> Result<Self, ConfigError> {
        let v = Vars(vars);
        let platform_name = v.required("PLATFORM_NAME")?;
        let is_simulator = platform_name.ends_with("simulator");

        Ok(Self {
            action: xcode_action(vars),
            configuration: v.required("CONFIGURATION")?,
            codesigning_folder_path: v.required("CODESIGNING_FOLDER_PATH")?.into(),
            built_products_dir: v.required("BUILT_PRODUCTS_DIR")?.into(),
            target_build_dir: v.required("TARGET_BUILD_DIR")?.into(),
            full_product_name: v.required("FULL_PRODUCT_NAME")?,
            executable_path: v.optional("EXECUTABLE_PATH"),
            wrapper_suffix: v.optional("WRAPPER_SUFFIX").unwrap_or_default(),
            wrapper_extension: v.optional("WRAPPER_EXTENSION"),
            product_type: v.required("PRODUCT_TYPE")?,
            project_dir: v.required("PROJECT_DIR")?.into(),
            project_file_path: v.required("PROJECT_FILE_PATH")?.into(),
            sdk_version: v.optional("SDK_VERSION"),
            test_host: v.optional("TEST_HOST").map(PathBuf::from),
            derived_sources_dir: v.optional("DERIVED_SOURCES_DIR").map(PathBuf::from),
            dwarf_dsym_file_name: v.optional("DWARF_DSYM_FILE_NAME"),
            current_arch: v.required("CURRENT_ARCH")?,
            code_signing_allowed: !is_simulator && v.flag("CODE_SIGNING_ALLOWED", false),
            xcode_version_actual: v.optional("XCODE_VERSION_ACTUAL"),
            workspace_root: v.required("XCBAZEL_WR")?.into(),
            build_path: v.optional("XCBAZEL_BUILD_PATH").unwrap_or_default(),
            generate_dsym: v.flag("XCBAZEL_USE_DSYM", false),
            use_debug_prefix_map: v.flag("XCBAZEL_DEBUG_PREFIX_MAP", true),
            collect_dsym: v.flag("XCBAZEL_COLLECT_DSYM", true),
            queue_builds: v.flag("XCBAZEL_QUEUE_BUILDS", true),
            test_runner_only: v.flag("XCBAZEL_TEST_RUNNER_ONLY", false),
            platform_name,
            main_group_path,
        })
    }

    /// Where Xcode expects the primary product: `TARGET_BUILD_DIR/FULL_PRODUCT_NAME`.
    pub fn artifact_output_path(&self) -> PathBuf {
        self.target_build_dir.join(&self.full_product_name)
    }

    pub fn is_simulator(&self) -> bool {
        self.platform_name.ends_with("simulator")
    }

    pub fn is_macos(&self) -> bool {
        self.platform_name.starts_with("macos")
    }

    pub fn is_test(&self) -> bool {
        self.wrapper_extension.as_deref() == Some("xctest")
    }

    pub fn is_watch_app(&self) -> bool {
        self.product_type == WATCH_APP2_PRODUCT_TYPE
    }

    /// Directory for bookkeeping files inside the `.xcodeproj` bundle.
    pub fn project_state_dir(&self) -> PathBuf {
        self.project_file_path.join(".xcbazel")
    }

    /// Entitlements template for the UI test runner, shipped in the project.
    pub fn runner_entitlements_template(&self) -> PathBuf {
        let prefix = if self.is_macos() { "macOS" } else { "iOS" };
        self.project_state_dir()
            .join("Resources")
            .join(format!("{prefix}XCTRunner.entitlements"))
    }
}
