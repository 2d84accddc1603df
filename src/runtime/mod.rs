//! Installation runtime
//!
//! Drives one install as a small state machine:
//!
//! ```text
//! Idle -> Parsed -> Extracting -> ScriptsRunning -> Complete
//!   \________\___________\______________\________-> Error
//! ```
//!
//! Extraction is not transactional. Whatever was written before a failure or
//! a cancellation stays on disk.

mod env;
mod script;

pub use env::{expand_env, expand_with};
pub use script::{
    ProcessRunner, ScriptExit, ScriptInvocation, ScriptReport, ScriptRunner, ScriptStatus,
    TIMEOUT_EXIT_CODE,
};

use crate::archive::{extract_partial, extract_to, ExtractOptions, ExtractSummary};
use crate::container::{parse_file, ParsedContainer};
use crate::error::{InspaError, Result};
use crate::header::InstallerHeader;
use crate::progress::{CancelToken, NoProgress, ProgressSink, Stage};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Idle,
    Parsed,
    Extracting,
    ScriptsRunning,
    Complete,
    Error,
}

/// Knobs for one installation
#[derive(Clone)]
pub struct InstallOptions {
    /// Overrides the header's default path
    pub install_dir: Option<PathBuf>,
    /// Record per-file write failures instead of aborting extraction
    pub continue_on_io_error: bool,
    /// Check the archive SHA-256 before extracting
    pub verify_digest: bool,
    pub run_scripts: bool,
    pub runner: Arc<dyn ScriptRunner>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            install_dir: None,
            continue_on_io_error: false,
            verify_digest: true,
            run_scripts: true,
            runner: Arc::new(ProcessRunner::default()),
        }
    }
}

impl fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOptions")
            .field("install_dir", &self.install_dir)
            .field("continue_on_io_error", &self.continue_on_io_error)
            .field("verify_digest", &self.verify_digest)
            .field("run_scripts", &self.run_scripts)
            .finish_non_exhaustive()
    }
}

/// What an installation did
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub state: InstallState,
    pub install_dir: PathBuf,
    pub files_written: usize,
    /// Files that could not be written, with the reason
    pub failed_files: Vec<(String, String)>,
    pub scripts: Vec<ScriptReport>,
    pub cancelled: bool,
    pub success: bool,
    /// Extraction error that ended the file phase early, if any
    pub error: Option<String>,
}

/// Runs one installation from a container file
pub struct Installer {
    source: PathBuf,
    options: InstallOptions,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    state: InstallState,
}

impl Installer {
    pub fn new(source: impl Into<PathBuf>, options: InstallOptions) -> Self {
        Self {
            source: source.into(),
            options,
            sink: Arc::new(NoProgress),
            cancel: CancelToken::new(),
            state: InstallState::Idle,
        }
    }

    pub fn with_progress<S: ProgressSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    fn transition(&mut self, next: InstallState) {
        if self.state == InstallState::Error {
            return;
        }
        debug!("Install state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Parse, extract and run post-install actions.
    ///
    /// Only a container that cannot be parsed is returned as `Err`; once the
    /// file phase starts, failures are reported in the [`InstallOutcome`].
    pub fn run(&mut self) -> Result<InstallOutcome> {
        if self.state != InstallState::Idle {
            return Err(InspaError::Config(format!(
                "Installer already ran (state {:?})",
                self.state
            )));
        }

        self.sink.started(Stage::Parse);
        let parsed = match self.parse() {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.fail(Stage::Parse, "cannot parse installer", e)),
        };
        self.sink.finished(Stage::Parse);
        self.transition(InstallState::Parsed);

        let install_dir = match self.install_dir(&parsed.header) {
            Ok(dir) => dir,
            Err(e) => return Err(self.fail(Stage::Extract, "cannot resolve install directory", e)),
        };
        info!(
            "Installing {} {} to {}",
            parsed.header.product.name,
            parsed.header.product.version,
            install_dir.display()
        );

        self.transition(InstallState::Extracting);
        let (summary, extract_error) = self.extract(&parsed, &install_dir);
        let cancelled = summary.cancelled;
        let mut succeeded = extract_error.is_none() && summary.failed.is_empty() && !cancelled;

        let mut scripts = Vec::new();
        if self.options.run_scripts && !parsed.header.scripts.is_empty() {
            self.transition(InstallState::ScriptsRunning);
            scripts = self.run_scripts(&parsed.header, &install_dir, &mut succeeded);
        }

        let success = succeeded && !self.cancel.is_cancelled();
        if success {
            self.transition(InstallState::Complete);
            info!(
                "Installation complete: {} files in {}",
                summary.files_written,
                install_dir.display()
            );
        } else {
            self.transition(InstallState::Error);
            warn!(
                "Installation finished with errors ({} files written, {} failed)",
                summary.files_written,
                summary.failed.len()
            );
        }

        Ok(InstallOutcome {
            state: self.state,
            install_dir,
            files_written: summary.files_written,
            failed_files: summary.failed,
            scripts,
            cancelled: cancelled || self.cancel.is_cancelled(),
            success,
            error: extract_error,
        })
    }

    /// Enter the Error state and tag `e` with the stage it aborted
    fn fail(&mut self, stage: Stage, context: &str, e: InspaError) -> InspaError {
        error!("{} {}: {}", context, self.source.display(), e);
        self.sink.failed(stage, &format!("{}: {}", context, e));
        self.transition(InstallState::Error);
        e.in_stage(stage)
    }

    fn install_dir(&self, header: &InstallerHeader) -> Result<PathBuf> {
        let override_dir = self.options.install_dir.as_deref();
        let cwd = match override_dir {
            Some(_) => PathBuf::new(),
            None => std::env::current_dir()?,
        };
        Ok(resolve_install_dir(header, override_dir, &cwd))
    }

    fn parse(&self) -> Result<ParsedContainer> {
        let parsed = parse_file(&self.source)?;
        if self.options.verify_digest {
            parsed.verify_digest()?;
        }
        Ok(parsed)
    }

    fn extract(&self, parsed: &ParsedContainer, dir: &Path) -> (ExtractSummary, Option<String>) {
        self.sink.started(Stage::Extract);
        let options = ExtractOptions {
            continue_on_io_error: self.options.continue_on_io_error,
            restore_mtime: true,
        };
        let (summary, result) = extract_partial(
            &parsed.compressed,
            parsed.header.compression.algo,
            dir,
            parsed.header.original_size(),
            &options,
            self.sink.as_ref(),
            Some(&self.cancel),
        );

        match result {
            Ok(()) => {
                self.sink.finished(Stage::Extract);
                (summary, None)
            }
            Err(e) => {
                error!(
                    "Extraction failed after {} files: {}",
                    summary.files_written, e
                );
                self.sink.failed(Stage::Extract, &e);
                (summary, Some(e.to_string()))
            }
        }
    }

    fn run_scripts(
        &self,
        header: &InstallerHeader,
        install_dir: &Path,
        succeeded: &mut bool,
    ) -> Vec<ScriptReport> {
        self.sink.started(Stage::Scripts);
        let total = header.scripts.len() as u64;
        let env = script_env(header, install_dir);
        let mut reports = Vec::with_capacity(header.scripts.len());

        for (index, action) in header.scripts.iter().enumerate() {
            let status = if self.cancel.is_cancelled() {
                ScriptStatus::Cancelled
            } else if !action.run_if.allows(*succeeded) {
                debug!("Skipping {} (run_if {:?})", action.command, action.run_if);
                ScriptStatus::Skipped
            } else {
                let invocation =
                    ScriptInvocation::for_action(action, install_dir).with_env(env.clone());
                info!("Running post-install action: {}", invocation.command_line());
                match self.options.runner.run(&invocation) {
                    Ok(exit) if exit.success() => ScriptStatus::Succeeded,
                    Ok(exit) if exit.timed_out => ScriptStatus::TimedOut,
                    Ok(exit) => ScriptStatus::Failed { code: exit.code },
                    Err(e) => ScriptStatus::Error(e.to_string()),
                }
            };

            let report = ScriptReport {
                command: action.command.clone(),
                kind: action.kind,
                required: action.required,
                status,
            };
            if report.failed() {
                warn!("Post-install action {} failed: {:?}", action.command, report.status);
                if action.required {
                    *succeeded = false;
                }
            }
            reports.push(report);
            self.sink
                .progress(Stage::Scripts, index as u64 + 1, total, &action.command);
        }

        self.sink.finished(Stage::Scripts);
        reports
    }
}

/// Pick the install directory: override, then the header default, then a cwd fallback
pub fn resolve_install_dir(
    header: &InstallerHeader,
    override_dir: Option<&Path>,
    cwd: &Path,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    let declared = header.install.default_path.trim();
    if !declared.is_empty() {
        return PathBuf::from(expand_env(declared));
    }

    let name: String = header
        .product
        .name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    cwd.join("installed").join(name)
}

/// Scalar `env` entries from the header plus `INSPA_INSTALL_DIR`
fn script_env(header: &InstallerHeader, install_dir: &Path) -> Vec<(String, String)> {
    let mut vars = vec![(
        "INSPA_INSTALL_DIR".to_string(),
        install_dir.to_string_lossy().into_owned(),
    )];
    if let Some(env) = &header.env {
        for (key, value) in env {
            let value = match value {
                Value::String(s) => expand_env(s),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            vars.push((key.clone(), value));
        }
    }
    vars
}

/// Parse a container and extract its files without running scripts
pub fn extract_container(
    source: &Path,
    dest: &Path,
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> Result<ExtractSummary> {
    let parsed = parse_file(source).map_err(|e| e.in_stage(Stage::Parse))?;
    parsed.verify_digest()?;
    extract_to(
        &parsed.compressed,
        parsed.header.compression.algo,
        dest,
        parsed.header.original_size(),
        options,
        sink,
        cancel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{CompressionAlgo, FileEntry};
    use crate::header::{BuildInfo, CompressionInfo, InstallRules, ProductInfo};

    fn header(default_path: &str) -> InstallerHeader {
        InstallerHeader::new(
            ProductInfo::new("My/App", "1.0"),
            InstallRules {
                default_path: default_path.to_string(),
                ..InstallRules::default()
            },
            CompressionInfo::new(CompressionAlgo::Zstd, 3),
            vec![FileEntry::file("a.txt", 1, 0)],
            Vec::new(),
            "00",
            BuildInfo::now("fp"),
        )
    }

    #[test]
    fn test_install_dir_priority() {
        let cwd = Path::new("/work");
        let h = header("/opt/declared");
        assert_eq!(
            resolve_install_dir(&h, Some(Path::new("/explicit")), cwd),
            PathBuf::from("/explicit")
        );
        assert_eq!(resolve_install_dir(&h, None, cwd), PathBuf::from("/opt/declared"));
        assert_eq!(
            resolve_install_dir(&header(""), None, cwd),
            PathBuf::from("/work/installed/My_App")
        );
    }

    #[test]
    fn test_script_env_exports_scalars() {
        let mut env = serde_json::Map::new();
        env.insert("MODE".into(), Value::String("full".into()));
        env.insert("LEVEL".into(), serde_json::json!(3));
        env.insert("NESTED".into(), serde_json::json!({"a": 1}));
        let h = header("").with_env(env);

        let vars = script_env(&h, Path::new("/opt/app"));
        assert_eq!(vars[0], ("INSPA_INSTALL_DIR".to_string(), "/opt/app".to_string()));
        assert!(vars.contains(&("MODE".to_string(), "full".to_string())));
        assert!(vars.contains(&("LEVEL".to_string(), "3".to_string())));
        assert!(!vars.iter().any(|(k, _)| k == "NESTED"));
    }

    #[test]
    fn test_parse_failure_enters_error_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.exe");
        std::fs::write(&bogus, vec![0u8; 2048]).unwrap();

        let mut installer = Installer::new(&bogus, InstallOptions::default());
        let err = installer.run().unwrap_err();
        assert!(err.is_structural());
        assert_eq!(installer.state(), InstallState::Error);
        assert!(installer.run().is_err());
    }

    #[test]
    fn test_fail_enters_error_from_parsed() {
        let mut installer = Installer::new("unused.exe", InstallOptions::default());
        installer.transition(InstallState::Parsed);

        let cwd_gone = InspaError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "cwd"));
        let err = installer.fail(Stage::Extract, "cannot resolve install directory", cwd_gone);

        assert_eq!(installer.state(), InstallState::Error);
        match err {
            InspaError::Stage { stage, source } => {
                assert_eq!(stage, Stage::Extract);
                assert!(matches!(*source, InspaError::Io(_)));
            }
            other => panic!("Expected Stage error, got: {:?}", other),
        }
    }

    #[test]
    fn test_install_dir_override_skips_cwd() {
        let installer = Installer::new(
            "unused.exe",
            InstallOptions {
                install_dir: Some(PathBuf::from("/explicit")),
                ..InstallOptions::default()
            },
        );
        assert_eq!(
            installer.install_dir(&header("")).unwrap(),
            PathBuf::from("/explicit")
        );
    }
}
