//! Subprocess execution.

use super::CommandRunner;
use crate::errors::CollabError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default bound for a single subprocess.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Data written to stdin, if any.
    pub stdin: Option<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Upper bound on run time.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Creates a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Runs `script` through `sh -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets stdin.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renders the command line for logs and errors.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns true if any argument equals `needle`.
    #[must_use]
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when killed by a signal.
    pub code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true on exit code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }

    /// Trimmed stdout followed by trimmed stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_string(),
            (false, true) => out.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }

    /// Turns a non-zero exit into [`CollabError::Exit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command did not exit 0.
    pub fn check(self, spec: &CommandSpec) -> Result<Self, CollabError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CollabError::Exit {
                command: spec.display(),
                code: self.code,
                output: self.combined(),
            })
        }
    }
}

/// Runs a command and fails on non-zero exit.
///
/// # Errors
///
/// Returns the runner's error or [`CollabError::Exit`].
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, CollabError> {
    runner.run_command(spec).await?.check(spec)
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Creates a runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, CollabError> {
        debug!(command = %spec.display(), "Running command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| CollabError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| CollabError::Spawn {
                    program: spec.program.clone(),
                    reason: format!("writing stdin: {e}"),
                })?;
        }

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CollabError::Spawn {
                program: spec.program.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                return Err(CollabError::Timeout {
                    command: spec.display(),
                    timeout: spec.timeout,
                })
            }
        };

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %spec.display(), code = result.code, "Command finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("iptables").args(["-C", "INPUT"]).arg("-j").arg("ACCEPT");
        assert_eq!(spec.display(), "iptables -C INPUT -j ACCEPT");
        assert!(spec.has_arg("-C"));
        assert_eq!(spec.timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_check_maps_exit_code() {
        let spec = CommandSpec::new("helm").arg("status");
        assert!(CommandOutput::ok("deployed").check(&spec).is_ok());

        let err = CommandOutput::failed(1, "Error: release: not found\n")
            .check(&spec)
            .unwrap_err();
        assert_eq!(
            err,
            CollabError::Exit {
                command: "helm status".to_string(),
                code: 1,
                output: "Error: release: not found".to_string(),
            }
        );
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            code: 0,
            stdout: "a\n".to_string(),
            stderr: " b ".to_string(),
        };
        assert_eq!(out.combined(), "a\nb");
        assert_eq!(CommandOutput::failed(2, "oops").combined(), "oops");
    }

    #[tokio::test]
    async fn test_shell_runner_captures_output_and_stdin() {
        let spec = CommandSpec::shell("cat; echo err >&2; exit 3").stdin("hello");
        let out = ShellRunner::new().run_command(&spec).await.unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_shell_runner_times_out() {
        let spec = CommandSpec::shell("sleep 5").timeout(Duration::from_millis(50));
        let err = ShellRunner::new().run_command(&spec).await.unwrap_err();
        assert!(matches!(err, CollabError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_shell_runner_spawn_failure() {
        let spec = CommandSpec::new("/nonexistent/siab-test-binary");
        let err = ShellRunner::new().run_command(&spec).await.unwrap_err();
        assert!(matches!(err, CollabError::Spawn { .. }));
    }
}
