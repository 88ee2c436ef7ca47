//! Configuration
//!
//! Bridge settings come from four merged layers:
//! 1. Built-in defaults
//! 2. Host/user config (~/.config/xcbazel/config.toml)
//! 3. Repo config (<workspace>/.xcbazel.toml)
//! 4. CLI flags
//!
//! Xcode's own build settings arrive through the environment and are read
//! separately into [`XcodeEnv`].

mod defaults;
mod effective;
mod merge;
mod xcode_env;

pub use defaults::BuiltinDefaults;
pub use effective::{
    expand_home, home_dir, BridgeConfig, ConfigError, ConfigOrigin, ConfigSource,
    EffectiveConfig, ALL_CONFIGS, HOST_CONFIG_PATH, REPO_CONFIG_FILE,
};
pub use merge::merge_layers;
pub use xcode_env::{xcode_action, XcodeEnv, WATCH_APP2_PRODUCT_TYPE};

#[cfg(test)]
pub(crate) use xcode_env::tests::device_vars;
