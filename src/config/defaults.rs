//! Built-in bridge defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Suffix of the output descriptor files produced by the aspect
    pub descriptor_suffix: String,

    /// Output group requested from Bazel in addition to `default`
    pub output_group: String,

    /// Aspect generating the output descriptors
    pub aspect: String,

    /// `--tool_tag` passed to Bazel
    pub tool_tag: String,

    /// Event file poll interval in milliseconds (default: 100)
    pub poll_interval_ms: u64,

    /// Global build lock
    pub lock_path: String,

    /// JSON symbol cache consulted by the debugger's dSYM lookup
    pub symbol_cache_path: String,

    /// Debugger init file rewritten after every build
    pub lldbinit_path: String,

    /// Optional user file sourced at the end of the debugger init file
    pub lldbinit_epilogue_path: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            descriptor_suffix: ".xcbazelouts".to_string(),
            output_group: "xcbazel-outputs".to_string(),
            aspect: "@xcbazel//xcbazel:xcbazel_aspects.bzl%xcbazel_outputs_aspect".to_string(),
            tool_tag: "xcbazel:build".to_string(),
            poll_interval_ms: 100,
            lock_path: crate::lock::DEFAULT_BUILD_LOCK_PATH.to_string(),
            symbol_cache_path: "~/Library/Application Support/xcbazel/symbol_cache.json"
                .to_string(),
            lldbinit_path: "~/.lldbinit-xcbazel".to_string(),
            lldbinit_epilogue_path: "~/.lldbinit-xcbazel-epilogue".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "descriptor_suffix": self.descriptor_suffix,
            "output_group": self.output_group,
            "aspect": self.aspect,
            "tool_tag": self.tool_tag,
            "poll_interval_ms": self.poll_interval_ms,
            "paths": {
                "lock": self.lock_path,
                "symbol_cache": self.symbol_cache_path,
                "lldbinit": self.lldbinit_path,
                "lldbinit_epilogue": self.lldbinit_epilogue_path,
            },
            "startup_options": {},
            "build_options": {},
        })
    }
}
