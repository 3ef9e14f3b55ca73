//! External-process capability. Every tool the benchmarks shell out to
//! (`rclone`, `vllm`, `rocm-smi`, `amd-smi`, the training launcher) goes
//! through [`ProcessRunner`], so tests can swap in a fake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub env: Vec<(String, String)>,
  pub working_dir: Option<PathBuf>,
  /// stdout and stderr both go here when set; otherwise they are captured.
  pub output_file: Option<PathBuf>,
  pub timeout: Option<Duration>,
}

impl Invocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      ..Default::default()
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }

  pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
    self.working_dir = Some(dir.as_ref().to_path_buf());
    self
  }

  pub fn output_to(mut self, path: impl AsRef<Path>) -> Self {
    self.output_file = Some(path.as_ref().to_path_buf());
    self
  }

  pub fn timeout(mut self, limit: Duration) -> Self {
    self.timeout = Some(limit);
    self
  }

  pub fn command_line(&self) -> String {
    let mut parts = vec![self.program.clone()];
    parts.extend(self.args.iter().cloned());
    parts.join(" ")
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
  pub exit_code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.exit_code == Some(0)
  }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
  /// Runs to completion. Errors only when the process cannot be started or
  /// exceeds its timeout; a non-zero exit is reported through `exit_code`.
  async fn invoke(&self, invocation: &Invocation) -> Result<ProcessOutput>;

  /// Starts the process and returns without waiting for it.
  fn spawn_detached(&self, invocation: &Invocation) -> Result<Option<u32>>;
}

/// Exit code, or the negated signal number when the process was killed.
fn exit_code(status: ExitStatus) -> Option<i32> {
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return Some(-signal);
    }
  }
  status.code()
}

pub struct SystemRunner;

impl SystemRunner {
  fn command(invocation: &Invocation) -> Result<Command> {
    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .envs(invocation.env.iter().map(|(k, v)| (k, v)))
      .stdin(Stdio::null());
    if let Some(dir) = &invocation.working_dir {
      command.current_dir(dir);
    }
    match &invocation.output_file {
      Some(path) => {
        let stdout = File::create(path)
          .with_context(|| format!("Failed to open log file {}", path.display()))?;
        let stderr = stdout.try_clone()?;
        command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
      }
      None => {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
      }
    }
    Ok(command)
  }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
  async fn invoke(&self, invocation: &Invocation) -> Result<ProcessOutput> {
    debug!("Running: {}", invocation.command_line());
    let mut command = Self::command(invocation)?;
    command.kill_on_drop(true);
    let child = command
      .spawn()
      .with_context(|| format!("Failed to spawn {}", invocation.program))?;

    let wait = child.wait_with_output();
    let output = match invocation.timeout {
      Some(limit) => tokio::time::timeout(limit, wait)
        .await
        .with_context(|| format!("{} timed out after {:?}", invocation.program, limit))??,
      None => wait.await?,
    };

    Ok(ProcessOutput {
      exit_code: exit_code(output.status),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
  }

  fn spawn_detached(&self, invocation: &Invocation) -> Result<Option<u32>> {
    let child = Self::command(invocation)?
      .spawn()
      .with_context(|| format!("Failed to spawn {}", invocation.program))?;
    let pid = child.id();
    info!("{} started with PID {:?}", invocation.program, pid);
    Ok(pid)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_command_line() {
    let invocation = Invocation::new("rclone")
      .args(["ls", "ds:bucket/models"])
      .env("RCLONE_VERBOSE", "1");
    assert_eq!(invocation.command_line(), "rclone ls ds:bucket/models");
    assert_eq!(invocation.env, vec![("RCLONE_VERBOSE".to_string(), "1".to_string())]);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn captures_stdout_and_exit_code() {
    let output = SystemRunner
      .invoke(&Invocation::new("sh").args(["-c", "echo hello; exit 3"]))
      .await
      .unwrap();
    assert_eq!(output.stdout, "hello\n");
    assert_eq!(output.exit_code, Some(3));
    assert!(!output.success());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn passes_environment_overrides() {
    let output = SystemRunner
      .invoke(&Invocation::new("sh").args(["-c", "echo $TP"]).env("TP", "8"))
      .await
      .unwrap();
    assert_eq!(output.stdout.trim(), "8");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn redirects_output_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    let output = SystemRunner
      .invoke(&Invocation::new("sh").args(["-c", "echo out; echo err 1>&2"]).output_to(&log))
      .await
      .unwrap();
    assert!(output.success());
    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.contains("out"));
    assert!(text.contains("err"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn killed_process_reports_negative_signal() {
    let output = SystemRunner
      .invoke(&Invocation::new("sh").args(["-c", "kill -9 $$"]))
      .await
      .unwrap();
    assert_eq!(output.exit_code, Some(-9));
    assert!(!output.success());
  }

  #[tokio::test]
  async fn missing_program_is_an_error() {
    let result = SystemRunner
      .invoke(&Invocation::new("definitely-not-a-real-binary-1234"))
      .await;
    assert!(result.is_err());
  }
}
