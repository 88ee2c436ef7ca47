//! xcbazel CLI
//!
//! Entry point for the `xcbazel` build phase tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use xcbazel_bridge::config::{home_dir, HOST_CONFIG_PATH, REPO_CONFIG_FILE};
use xcbazel_bridge::lock::BuildLock;
use xcbazel_bridge::process::SystemRunner;
use xcbazel_bridge::remap::{BootstrapStatus, DebugPathRemapper};
use xcbazel_bridge::report::{init_logging, Timer};
use xcbazel_bridge::signal::SignalHandler;
use xcbazel_bridge::symbol_cache::JsonSymbolCache;
use xcbazel_bridge::{
    Bridge, BridgeError, BuildInvocation, Diagnostics, EffectiveConfig, XcodeConsole, XcodeEnv,
};

#[derive(Parser)]
#[command(name = "xcbazel")]
#[command(about = "Xcode build phase driver for Bazel", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build Bazel targets for the current Xcode target
    Build {
        /// Bazel labels to build
        #[arg(required = true)]
        targets: Vec<String>,

        /// Bazel client to run
        #[arg(long)]
        bazel: PathBuf,

        /// Path of the bazel-bin link, relative to the working directory
        #[arg(long, default_value = "bazel-bin")]
        bazel_bin_path: PathBuf,

        /// Install outputs into Xcode's build directories
        #[arg(long)]
        install_generated_artifacts: bool,

        /// Repo config file (default: <XCBAZEL_WR>/.xcbazel.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Override the --tool_tag passed to Bazel
        #[arg(long)]
        tool_tag: Option<String>,

        /// Extra Bazel startup option for every configuration (repeatable)
        #[arg(long = "startup-option", allow_hyphen_values = true)]
        startup_options: Vec<String>,

        /// Extra Bazel build option for every configuration (repeatable)
        #[arg(long = "build-option", allow_hyphen_values = true)]
        build_options: Vec<String>,
    },

    /// Make Xcode's lldbinit source the one written after every build
    BootstrapLldbinit {
        /// Remove the sourcing block instead of adding it
        #[arg(long)]
        remove: bool,
    },

    /// Drop symbol cache rows whose dSYM no longer exists
    CleanSymbolCache {
        /// Symbol cache file (default: from configuration)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        warn!(error = %e, "failed to install interrupt handler");
    }

    let mut console = XcodeConsole;
    let result = match cli.command {
        Commands::Build {
            targets,
            bazel,
            bazel_bin_path,
            install_generated_artifacts,
            config,
            tool_tag,
            startup_options,
            build_options,
        } => {
            let invocation = BuildInvocation {
                bazel,
                bazel_bin_path,
                targets,
                install_generated_artifacts,
                startup_options,
                build_options,
            };
            run_build(invocation, config, tool_tag, &mut console)
        }
        Commands::BootstrapLldbinit { remove } => run_bootstrap_lldbinit(remove),
        Commands::CleanSymbolCache { path } => run_clean_symbol_cache(path),
    };

    if let Err(e) = result {
        console.error(&e.to_string());
        process::exit(e.exit_code());
    }
}

fn run_build(
    invocation: BuildInvocation,
    repo_config: Option<PathBuf>,
    tool_tag: Option<String>,
    console: &mut XcodeConsole,
) -> Result<(), BridgeError> {
    let env = XcodeEnv::from_env()?;
    let home = home_dir();
    let repo_config = repo_config.unwrap_or_else(|| env.workspace_root.join(REPO_CONFIG_FILE));
    let host_config = home.join(HOST_CONFIG_PATH);
    let cli_overrides = tool_tag.map(|tag| serde_json::json!({ "tool_tag": tag }));
    let effective = EffectiveConfig::build(
        Some(host_config.as_path()),
        Some(repo_config.as_path()),
        cli_overrides,
    )?;
    for source in &effective.sources {
        debug!(origin = ?source.origin, path = ?source.path, "config source");
    }
    let config = effective.config;

    let _lock = if env.queue_builds {
        Some(BuildLock::acquire(&config.lock_path, console)?)
    } else {
        None
    };

    let runner = SystemRunner;
    let cache = JsonSymbolCache::new(config.symbol_cache_path.clone());
    let bridge = Bridge::new(&config, &env, &runner, &cache, home);

    let timer = Timer::start("Everything");
    let report = bridge.run(&invocation, console)?;
    timer.end();
    debug!(
        descriptors = report.descriptors.len(),
        dsyms = report.dsyms.len(),
        headers = report.generated_headers,
        "build phase finished"
    );
    Ok(())
}

fn run_bootstrap_lldbinit(remove: bool) -> Result<(), BridgeError> {
    let home = home_dir();
    let host_config = home.join(HOST_CONFIG_PATH);
    let config = EffectiveConfig::build(Some(host_config.as_path()), None, None)?.config;
    let remapper = DebugPathRemapper::new(
        home,
        config.lldbinit_path.clone(),
        config.lldbinit_epilogue_path.clone(),
    );

    let result = if remove {
        remapper.remove_bootstrap()
    } else {
        remapper.bootstrap()
    };
    match result.map_err(BridgeError::Lldbinit)? {
        BootstrapStatus::Changed => println!("Updated lldbinit bootstrap"),
        BootstrapStatus::Unchanged => println!("lldbinit bootstrap already up to date"),
    }
    Ok(())
}

fn run_clean_symbol_cache(path: Option<PathBuf>) -> Result<(), BridgeError> {
    let path = match path {
        Some(path) => path,
        None => {
            let host_config = home_dir().join(HOST_CONFIG_PATH);
            EffectiveConfig::build(Some(host_config.as_path()), None, None)?
                .config
                .symbol_cache_path
        }
    };

    let removed = JsonSymbolCache::new(path.clone()).prune_missing()?;
    println!("Removed {} stale entries from {}", removed, path.display());
    Ok(())
}
