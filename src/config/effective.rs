//! Effective bridge configuration with provenance
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (`~/.config/xcbazel/config.toml`)
//! 3. Repo config (`<workspace>/.xcbazel.toml`)
//! 4. CLI overrides
//!
//! The merged document is deserialized into [`BridgeConfig`]; paths starting
//! with `~/` are expanded against `HOME`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Key of option lists applying to every build configuration.
pub const ALL_CONFIGS: &str = "all";

/// Host-wide configuration file, relative to `HOME`.
pub const HOST_CONFIG_PATH: &str = ".config/xcbazel/config.toml";

/// Per-workspace configuration file name.
pub const REPO_CONFIG_FILE: &str = ".xcbazel.toml";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Repo,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPaths {
    lock: String,
    symbol_cache: String,
    lldbinit: String,
    lldbinit_epilogue: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    descriptor_suffix: String,
    output_group: String,
    aspect: String,
    tool_tag: String,
    poll_interval_ms: u64,
    paths: RawPaths,
    #[serde(default)]
    startup_options: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    build_options: BTreeMap<String, Vec<String>>,
}

/// Resolved configuration used by every bridge component.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub descriptor_suffix: String,
    pub output_group: String,
    pub aspect: String,
    pub tool_tag: String,
    pub poll_interval_ms: u64,
    pub lock_path: PathBuf,
    pub symbol_cache_path: PathBuf,
    pub lldbinit_path: PathBuf,
    pub lldbinit_epilogue_path: PathBuf,
    /// Bazel startup options keyed by configuration name or [`ALL_CONFIGS`].
    pub startup_options: BTreeMap<String, Vec<String>>,
    /// Bazel build options keyed by configuration name or [`ALL_CONFIGS`].
    pub build_options: BTreeMap<String, Vec<String>>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let home = home_dir();
        let defaults = BuiltinDefaults::default();
        Self {
            descriptor_suffix: defaults.descriptor_suffix,
            output_group: defaults.output_group,
            aspect: defaults.aspect,
            tool_tag: defaults.tool_tag,
            poll_interval_ms: defaults.poll_interval_ms,
            lock_path: expand_home(&defaults.lock_path, &home),
            symbol_cache_path: expand_home(&defaults.symbol_cache_path, &home),
            lldbinit_path: expand_home(&defaults.lldbinit_path, &home),
            lldbinit_epilogue_path: expand_home(&defaults.lldbinit_epilogue_path, &home),
            startup_options: BTreeMap::new(),
            build_options: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    fn from_value(value: Value, home: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_value(value)
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;

        Ok(Self {
            descriptor_suffix: raw.descriptor_suffix,
            output_group: raw.output_group,
            aspect: raw.aspect,
            tool_tag: raw.tool_tag,
            poll_interval_ms: raw.poll_interval_ms,
            lock_path: expand_home(&raw.paths.lock, home),
            symbol_cache_path: expand_home(&raw.paths.symbol_cache, home),
            lldbinit_path: expand_home(&raw.paths.lldbinit, home),
            lldbinit_epilogue_path: expand_home(&raw.paths.lldbinit_epilogue, home),
            startup_options: raw.startup_options,
            build_options: raw.build_options,
        })
    }
}

/// Merged configuration plus the sources that contributed to it.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: BridgeConfig,
    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build effective config from layers. Missing files are skipped.
    pub fn build(
        host_config_path: Option<&Path>,
        repo_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        Self::build_with_home(host_config_path, repo_config_path, cli_overrides, &home_dir())
    }

    pub fn build_with_home(
        host_config_path: Option<&Path>,
        repo_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
        home: &Path,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        for (origin, path) in [
            (ConfigOrigin::Host, host_config_path),
            (ConfigOrigin::Repo, repo_config_path),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            debug!(path = %path.display(), %digest, ?origin, "loaded config layer");
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let config = BridgeConfig::from_value(merged, home)?;
        Self::validate_config(&config)?;

        Ok(Self { config, sources })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((toml_to_json(toml_value), digest))
    }

    fn validate_config(config: &BridgeConfig) -> Result<(), ConfigError> {
        if !config.descriptor_suffix.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "descriptor_suffix must start with '.', got {:?}",
                config.descriptor_suffix
            )));
        }
        if config.output_group.is_empty() {
            return Err(ConfigError::ValidationError(
                "output_group must not be empty".to_string(),
            ));
        }
        if config.poll_interval_ms == 0 || config.poll_interval_ms > 10_000 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be in (0, 10000]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Convert TOML Value to JSON Value
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// The user's home directory, `/tmp` when unset.
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Expand a leading `~/` against `home`.
pub fn expand_home(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if path == "~" => home.to_path_buf(),
        None => PathBuf::from(path),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("missing Xcode build setting {0}")]
    MissingVariable(String),
}
