//! External process execution.
//!
//! Every engine run is a blocking child process started in its scratch
//! directory, with stdout written to a fresh log file and stderr appended to
//! an error file. The exit status is only logged: whether a run succeeded is
//! decided later by the log parser from the engine's termination marker.

use crate::error::{QCError, Result};
use log::{debug, error, warn};
use std::env;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves an executable from its configured path, falling back to `PATH`.
///
/// # Errors
///
/// Returns [`QCError::Executable`] if a configured path does not exist or
/// `name` is not found on `PATH`.
pub fn resolve_executable(configured: &str, name: &str) -> Result<PathBuf> {
    if !configured.trim().is_empty() {
        let path = PathBuf::from(configured.trim());
        if path.is_file() {
            return Ok(path);
        }
        return Err(QCError::Executable(format!(
            "configured {} executable {} does not exist",
            name,
            path.display()
        )));
    }
    let path_var = env::var_os("PATH").unwrap_or_default();
    find_in_path(name, &path_var)
        .ok_or_else(|| QCError::Executable(format!("{} was not found on PATH", name)))
}

fn find_in_path(name: &str, path_var: &OsString) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A fully specified engine invocation.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    engine: String,
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: PathBuf,
    stdout: PathBuf,
    stderr: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl EngineCommand {
    /// Starts a command for `engine` running `program` inside `current_dir`,
    /// with stdout captured in `current_dir/output.out`.
    pub fn new(engine: &str, program: impl Into<PathBuf>, current_dir: &Path) -> Self {
        Self {
            engine: engine.to_string(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: current_dir.to_path_buf(),
            stdout: current_dir.join("output.out"),
            stderr: None,
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    /// Sets an environment variable for the child only.
    pub fn env(mut self, key: &str, value: impl ToString) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Redirects stdout to `path` (truncated).
    pub fn stdout_to(mut self, path: PathBuf) -> Self {
        self.stdout = path;
        self
    }

    /// Appends stderr to `path`.
    pub fn stderr_append(mut self, path: PathBuf) -> Self {
        self.stderr = Some(path);
        self
    }

    /// Kills the child after `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments in order.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Environment overrides in order.
    pub fn environment(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Human-readable command line for logging.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Runs the command to completion.
    ///
    /// # Errors
    ///
    /// - [`QCError::Executable`] if the program cannot be spawned
    /// - [`QCError::Timeout`] if the timeout expires; the child is killed
    /// - [`QCError::Io`] if the log files cannot be opened
    pub fn run(&self) -> Result<ExitStatus> {
        debug!("Running {} in {}", self.command_line(), self.current_dir.display());

        let stdout = File::create(&self.stdout)?;
        let stderr = match &self.stderr {
            Some(path) => Stdio::from(OpenOptions::new().create(true).append(true).open(path)?),
            None => Stdio::null(),
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(stderr)
            .spawn()
            .map_err(|e| {
                QCError::Executable(format!("failed to start {}: {}", self.program.display(), e))
            })?;

        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if started.elapsed() >= limit {
                        child.kill()?;
                        child.wait()?;
                        error!("{} exceeded the {} s timeout", self.engine, limit.as_secs());
                        return Err(QCError::Timeout {
                            engine: self.engine.clone(),
                            seconds: limit.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        if !status.success() {
            warn!("{} exited with {}", self.engine, status);
        }
        Ok(status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_redirection_and_env() {
        let dir = TempDir::new().unwrap();
        let exe = script(dir.path(), "fake", "echo \"threads=$OMP_NUM_THREADS $1\"\necho oops >&2");
        fs::write(dir.path().join("output.err"), "previous\n").unwrap();

        let status = EngineCommand::new("fake", &exe, dir.path())
            .arg("input.inp")
            .env("OMP_NUM_THREADS", 4)
            .stderr_append(dir.path().join("output.err"))
            .run()
            .unwrap();

        assert!(status.success());
        let out = fs::read_to_string(dir.path().join("output.out")).unwrap();
        assert_eq!(out.trim(), "threads=4 input.inp");
        let err = fs::read_to_string(dir.path().join("output.err")).unwrap();
        assert_eq!(err, "previous\noops\n");
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let exe = script(dir.path(), "fail", "exit 3");
        let status = EngineCommand::new("fail", &exe, dir.path()).run().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let exe = script(dir.path(), "slow", "sleep 5");
        let err = EngineCommand::new("slow", &exe, dir.path())
            .timeout(Some(Duration::from_millis(200)))
            .run()
            .unwrap_err();
        assert!(matches!(err, QCError::Timeout { .. }));
    }

    #[test]
    fn test_resolve_executable() {
        let dir = TempDir::new().unwrap();
        let exe = script(dir.path(), "xtb", "true");
        let path_var = OsString::from(dir.path());
        assert_eq!(find_in_path("xtb", &path_var), Some(exe.clone()));
        assert_eq!(find_in_path("crest", &path_var), None);
        assert_eq!(resolve_executable(exe.to_str().unwrap(), "xtb").unwrap(), exe);
        assert!(matches!(
            resolve_executable("/nonexistent/xtb", "xtb"),
            Err(QCError::Executable(_))
        ));
    }
}
