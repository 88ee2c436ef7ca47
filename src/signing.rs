//! Re-signing test bundles
//!
//! Xcode injects its own test frameworks into test hosts and UI test
//! runners after Bazel signed them, which breaks the signature on device.
//! They are re-signed with the identity Bazel used for the test bundle.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::XcodeEnv;
use crate::process::CommandRunner;
use crate::report::Timer;

/// Libraries and frameworks Xcode injects into test bundles, relative to
/// the bundle's `Frameworks/` folder.
pub const XCODE_INJECTED_FRAMEWORKS: &[&str] = &[
    "libXCTestBundleInject.dylib",
    "libXCTestSwiftSupport.dylib",
    "IDEBundleInjection.framework",
    "XCTAutomationSupport.framework",
    "XCTest.framework",
    "XCTestCore.framework",
    "XCTestSupport.framework",
    "XCUnit.framework",
    "XCUIAutomation.framework",
];

/// Signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Failed to read the signature of {path}: {reason}")]
    Inspect { path: PathBuf, reason: String },

    #[error("Re-sign command {command:?} failed. {output}")]
    Resign {
        command: Vec<String>,
        exit_code: i32,
        output: String,
    },

    #[error("Failed to extract {attribute} from the signature of {path}")]
    MissingAttribute {
        attribute: &'static str,
        path: PathBuf,
    },

    #[error("Could not instantiate UI runner entitlements at {path}: {source}")]
    Entitlements {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SigningError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SigningError::Resign { exit_code, .. } => 800 + exit_code,
            _ => 800,
        }
    }
}

/// Result type for signing
pub type SigningResult<T> = Result<T, SigningError>;

/// Signature attributes from `codesign -dvv`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodesignAttributes {
    pub authority: Option<String>,
    pub identifier: Option<String>,
    pub team_identifier: Option<String>,
}

impl CodesignAttributes {
    /// Take the first `Authority=`, `Identifier=` and `TeamIdentifier=` line.
    pub fn parse(output: &str) -> Self {
        let first = |name: &str| {
            output.lines().find_map(|line| {
                line.strip_prefix(name)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(|value| value.trim_end().to_string())
            })
        };
        Self {
            authority: first("Authority"),
            identifier: first("Identifier"),
            team_identifier: first("TeamIdentifier"),
        }
    }
}

/// Re-signs bundles, inspecting each signed bundle at most once per run.
pub struct SigningCoordinator<'a> {
    runner: &'a dyn CommandRunner,
    attributes: HashMap<PathBuf, CodesignAttributes>,
}

impl<'a> SigningCoordinator<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            attributes: HashMap::new(),
        }
    }

    /// Signature attributes of `bundle`, from cache when already inspected.
    pub fn attributes(&mut self, bundle: &Path) -> SigningResult<&CodesignAttributes> {
        if !self.attributes.contains_key(bundle) {
            let timer = Timer::start(format!("Extracting signature for {}", bundle.display()));
            let args = vec![
                "codesign".to_string(),
                "-dvv".to_string(),
                bundle.display().to_string(),
            ];
            let out = self
                .runner
                .run("xcrun", &args)
                .map_err(|e| SigningError::Inspect {
                    path: bundle.to_path_buf(),
                    reason: e.to_string(),
                })?;
            timer.end();
            if !out.is_success() {
                return Err(SigningError::Inspect {
                    path: bundle.to_path_buf(),
                    reason: out.output.trim().to_string(),
                });
            }
            self.attributes
                .insert(bundle.to_path_buf(), CodesignAttributes::parse(&out.output));
        }
        self.attributes
            .get(bundle)
            .ok_or_else(|| SigningError::Inspect {
                path: bundle.to_path_buf(),
                reason: "signature cache miss".to_string(),
            })
    }

    fn attribute(
        &mut self,
        bundle: &Path,
        name: &'static str,
        pick: fn(&CodesignAttributes) -> Option<&String>,
    ) -> SigningResult<String> {
        pick(self.attributes(bundle)?)
            .cloned()
            .ok_or(SigningError::MissingAttribute {
                attribute: name,
                path: bundle.to_path_buf(),
            })
    }

    /// Sign `path` with `identity`, keeping its entitlements unless a new
    /// entitlements file is given.
    pub fn resign_bundle(
        &self,
        path: &Path,
        identity: &str,
        entitlements: Option<&Path>,
    ) -> SigningResult<()> {
        let timer = Timer::start(format!("Signing {}", path.display()));
        let mut args: Vec<String> = ["codesign", "-f", "--timestamp=none", "-s", identity]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match entitlements {
            Some(file) => {
                args.push("--entitlements".to_string());
                args.push(file.display().to_string());
            }
            None => args.push("--preserve-metadata=entitlements".to_string()),
        }
        args.push(path.display().to_string());

        let command = || {
            let mut command = vec!["xcrun".to_string()];
            command.extend(args.iter().cloned());
            command
        };
        let out = self.runner.run("xcrun", &args).map_err(|e| SigningError::Resign {
            command: command(),
            exit_code: 0,
            output: e.to_string(),
        })?;
        timer.end();
        if !out.is_success() {
            return Err(SigningError::Resign {
                command: command(),
                exit_code: out.exit_code,
                output: out.output,
            });
        }
        Ok(())
    }

    /// Re-sign whichever injected frameworks are present in `bundle`.
    pub fn resign_injected_frameworks(&self, bundle: &Path, identity: &str) -> SigningResult<usize> {
        let mut signed = 0;
        for name in XCODE_INJECTED_FRAMEWORKS {
            let path = bundle.join("Frameworks").join(name);
            if path.exists() {
                self.resign_bundle(&path, identity, None)?;
                signed += 1;
            }
        }
        debug!(bundle = %bundle.display(), signed, "re-signed injected frameworks");
        Ok(signed)
    }

    /// Write `<output_dir>/<product>_UIRunner.entitlements` from `template`
    /// with the reference bundle's team and bundle identifiers filled in.
    pub fn instantiate_runner_entitlements(
        &mut self,
        template: &Path,
        output_dir: &Path,
        product_name: &str,
        reference_bundle: &Path,
    ) -> SigningResult<PathBuf> {
        let team = self.attribute(reference_bundle, "TeamIdentifier", |a| {
            a.team_identifier.as_ref()
        })?;
        let bundle_id =
            self.attribute(reference_bundle, "Identifier", |a| a.identifier.as_ref())?;

        let output = output_dir.join(format!("{product_name}_UIRunner.entitlements"));
        let write = || -> io::Result<()> {
            let contents = fs::read_to_string(template)?
                .replace("$(TeamIdentifier)", &team)
                .replace("$(BundleIdentifier)", &bundle_id);
            fs::create_dir_all(output_dir)?;
            if output.exists() {
                fs::remove_file(&output)?;
            }
            fs::write(&output, contents)
        };
        write().map_err(|source| SigningError::Entitlements {
            path: output.clone(),
            source,
        })?;
        Ok(output)
    }

    /// Re-sign what Xcode injected into the current test target.
    ///
    /// Unit tests re-sign the test host's frameworks; UI tests re-sign the
    /// runner's frameworks and then the runner itself with fresh
    /// entitlements. Nothing happens unless code signing is allowed.
    pub fn resign_test_artifacts(&mut self, env: &XcodeEnv, product_name: &str) -> SigningResult<()> {
        if !env.is_test() || !env.code_signing_allowed {
            return Ok(());
        }

        let reference = env.artifact_output_path();
        let identity = self.attribute(&reference, "Authority", |a| a.authority.as_ref())?;
        let timer = Timer::start("Re-signing injected test host artifacts");

        match &env.test_host {
            Some(test_host) => {
                let host_bundle = test_host.parent().unwrap_or(test_host);
                self.resign_injected_frameworks(host_bundle, &identity)?;
            }
            None => {
                let runner = &env.codesigning_folder_path;
                self.resign_injected_frameworks(runner, &identity)?;
                let output_dir = env
                    .derived_sources_dir
                    .clone()
                    .unwrap_or_else(|| env.target_build_dir.clone());
                let entitlements = self.instantiate_runner_entitlements(
                    &env.runner_entitlements_template(),
                    &output_dir,
                    product_name,
                    &reference,
                )?;
                self.resign_bundle(runner, &identity, Some(&entitlements))?;
            }
        }

        info!(identity = %identity, "re-signed test artifacts");
        timer.end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, MockRunner};
    use tempfile::TempDir;

    const CODESIGN_OUTPUT: &str = "\
Executable=/dd/App.app/App
Identifier=com.example.app
Format=app bundle with Mach-O thin (arm64)
Authority=Apple Development: Dev (ABCDE12345)
Authority=Apple Worldwide Developer Relations Certification Authority
TeamIdentifier=TEAM123456
";

    #[test]
    fn test_parse_attributes() {
        let attrs = CodesignAttributes::parse(CODESIGN_OUTPUT);
        assert_eq!(attrs.authority.as_deref(), Some("Apple Development: Dev (ABCDE12345)"));
        assert_eq!(attrs.identifier.as_deref(), Some("com.example.app"));
        assert_eq!(attrs.team_identifier.as_deref(), Some("TEAM123456"));

        assert_eq!(CodesignAttributes::parse("nothing"), CodesignAttributes::default());
    }

    #[test]
    fn test_attributes_are_cached_per_bundle() {
        let runner = MockRunner::new();
        runner.respond_by_default(CommandOutput::success(CODESIGN_OUTPUT));
        let mut signing = SigningCoordinator::new(&runner);

        signing.attributes(Path::new("/a/App.app")).unwrap();
        signing.attributes(Path::new("/a/App.app")).unwrap();
        signing.attributes(Path::new("/a/Other.app")).unwrap();

        assert_eq!(runner.count("xcrun codesign -dvv /a/App.app"), 1);
        assert_eq!(runner.count("xcrun codesign -dvv"), 2);
    }

    #[test]
    fn test_resign_command_line() {
        let runner = MockRunner::new();
        runner.respond_by_default(CommandOutput::success(""));
        let signing = SigningCoordinator::new(&runner);

        signing.resign_bundle(Path::new("/x/A.app"), "ID", None).unwrap();
        signing
            .resign_bundle(Path::new("/x/A.app"), "ID", Some(Path::new("/e.plist")))
            .unwrap();

        let calls = runner.calls();
        assert_eq!(
            calls[0].join(" "),
            "xcrun codesign -f --timestamp=none -s ID --preserve-metadata=entitlements /x/A.app"
        );
        assert_eq!(
            calls[1].join(" "),
            "xcrun codesign -f --timestamp=none -s ID --entitlements /e.plist /x/A.app"
        );
    }

    #[test]
    fn test_resign_failure_exit_code() {
        let runner = MockRunner::new();
        runner.respond("xcrun codesign -f", CommandOutput::failure(1, "no identity"));
        let signing = SigningCoordinator::new(&runner);

        let err = signing.resign_bundle(Path::new("/x"), "ID", None).unwrap_err();
        assert_eq!(err.exit_code(), 801);
    }

    #[test]
    fn test_only_present_frameworks_are_resigned() {
        let dir = TempDir::new().unwrap();
        let bundle = dir.path().join("Host.app");
        fs::create_dir_all(bundle.join("Frameworks/XCTest.framework")).unwrap();
        fs::write(bundle.join("Frameworks/libXCTestSwiftSupport.dylib"), "").unwrap();

        let runner = MockRunner::new();
        runner.respond_by_default(CommandOutput::success(""));
        let signing = SigningCoordinator::new(&runner);

        assert_eq!(signing.resign_injected_frameworks(&bundle, "ID").unwrap(), 2);
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_runner_entitlements() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("iOSXCTRunner.entitlements");
        fs::write(
            &template,
            "<string>$(TeamIdentifier).$(BundleIdentifier)</string>",
        )
        .unwrap();

        let runner = MockRunner::new();
        runner.respond_by_default(CommandOutput::success(CODESIGN_OUTPUT));
        let mut signing = SigningCoordinator::new(&runner);

        let out = signing
            .instantiate_runner_entitlements(
                &template,
                &dir.path().join("derived"),
                "AppUITests",
                Path::new("/dd/AppUITests.xctest"),
            )
            .unwrap();

        assert!(out.ends_with("AppUITests_UIRunner.entitlements"));
        assert_eq!(
            fs::read_to_string(out).unwrap(),
            "<string>TEAM123456.com.example.app</string>"
        );
    }
}
