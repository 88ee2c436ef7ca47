//! xcbazel - Xcode ⇄ Bazel build bridge
//!
//! Runs as an Xcode build phase script: builds the requested Bazel targets,
//! follows the build through Bazel's JSON event stream and installs the
//! outputs where Xcode, its debugger and its test runner expect them.

pub mod bridge;
pub mod build;
pub mod config;
pub mod descriptor;
pub mod genfiles;
pub mod install;
pub mod lock;
pub mod options;
pub mod process;
pub mod remap;
pub mod report;
pub mod signal;
pub mod signing;
pub mod symbol_cache;

pub use bridge::{Bridge, BridgeError, BridgeReport, BridgeResult, BuildInvocation};
pub use config::{BridgeConfig, EffectiveConfig, XcodeEnv};
pub use descriptor::OutputDescriptor;
pub use report::{CapturedDiagnostics, Diagnostics, XcodeConsole};
