//! Post-install action execution
//!
//! A [`PostAction`] is turned into a concrete [`ScriptInvocation`] and handed
//! to a [`ScriptRunner`]. [`ProcessRunner`] spawns real processes; tests and
//! embedders can supply their own runner.

use crate::error::{InspaError, Result};
use crate::header::{PostAction, ScriptKind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exit code reported when a script is killed on timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// A fully resolved process launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub hidden: bool,
    pub env: Vec<(String, String)>,
}

impl ScriptInvocation {
    /// Synthesize the interpreter command line for an action
    pub fn for_action(action: &PostAction, install_dir: &Path) -> Self {
        let mut args = Vec::new();
        let program = match action.kind {
            ScriptKind::Powershell => {
                args.extend(
                    ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass"]
                        .map(String::from),
                );
                if action.hidden {
                    args.extend(["-WindowStyle", "Hidden"].map(String::from));
                }
                if action.runs_script_file() {
                    args.push("-File".to_string());
                    args.push(resolve_in(install_dir, &action.command));
                    args.extend(action.args.iter().cloned());
                } else {
                    let mut inline = action.command.clone();
                    for arg in &action.args {
                        inline.push(' ');
                        inline.push_str(arg);
                    }
                    args.push("-Command".to_string());
                    args.push(inline);
                }
                "powershell.exe"
            }
            ScriptKind::Batch => {
                args.push("/C".to_string());
                if action.runs_script_file() {
                    args.push(resolve_in(install_dir, &action.command));
                } else {
                    args.push(action.command.clone());
                }
                args.extend(action.args.iter().cloned());
                "cmd.exe"
            }
        };

        let working_dir = match &action.working_dir {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => install_dir.join(dir),
            None => install_dir.to_path_buf(),
        };

        Self {
            program: program.to_string(),
            args,
            working_dir,
            timeout: Duration::from_secs(action.timeout_sec),
            hidden: action.hidden,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Printable command line for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

fn resolve_in(install_dir: &Path, command: &str) -> String {
    let path = Path::new(command);
    if path.is_absolute() {
        command.to_string()
    } else {
        install_dir.join(path).to_string_lossy().into_owned()
    }
}

/// How a launched script ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptExit {
    pub code: i32,
    pub timed_out: bool,
}

impl ScriptExit {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }
}

/// Executes script invocations
pub trait ScriptRunner: Send + Sync {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptExit>;
}

/// Runs invocations as child processes, killing them on timeout
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub poll_interval: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ScriptRunner for ProcessRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptExit> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if invocation.hidden {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            if invocation.hidden {
                command.creation_flags(CREATE_NO_WINDOW);
            }
        }

        debug!("Launching: {}", invocation.command_line());
        let mut child = command.spawn().map_err(|e| InspaError::Script {
            command: invocation.command_line(),
            reason: format!("failed to launch: {}", e),
        })?;

        wait_with_timeout(&mut child, invocation.timeout, self.poll_interval).map_err(|e| {
            InspaError::Script {
                command: invocation.command_line(),
                reason: format!("wait failed: {}", e),
            }
        })
    }
}

/// Poll a child until it exits or `timeout` passes, then kill it
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    poll_interval: Duration,
) -> std::io::Result<ScriptExit> {
    let deadline = Instant::now() + timeout;

    loop {
        match try_wait_with_eintr(child)? {
            Some(status) => {
                return Ok(ScriptExit {
                    code: exit_code(status),
                    timed_out: false,
                })
            }
            None if Instant::now() >= deadline => {
                warn!("Script exceeded {}s timeout, killing it", timeout.as_secs());
                let _ = child.kill();
                let _ = child.wait();
                return Ok(ScriptExit {
                    code: TIMEOUT_EXIT_CODE,
                    timed_out: true,
                });
            }
            None => std::thread::sleep(poll_interval),
        }
    }
}

fn try_wait_with_eintr(child: &mut Child) -> std::io::Result<Option<ExitStatus>> {
    loop {
        match child.try_wait() {
            Ok(status) => return Ok(status),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Outcome of one post-install action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStatus {
    /// `run_if` did not match the install state
    Skipped,
    Succeeded,
    Failed { code: i32 },
    TimedOut,
    /// Could not be launched at all
    Error(String),
    /// Not started because the install was cancelled
    Cancelled,
}

/// Per-action entry in an install outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub command: String,
    pub kind: ScriptKind,
    pub required: bool,
    pub status: ScriptStatus,
}

impl ScriptReport {
    /// Failed in a way that counts against `required`
    pub fn failed(&self) -> bool {
        matches!(
            self.status,
            ScriptStatus::Failed { .. } | ScriptStatus::TimedOut | ScriptStatus::Error(_)
        )
    }
}
