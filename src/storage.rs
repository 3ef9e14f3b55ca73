use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use crate::config::StorageConfig;
use crate::process::{Invocation, ProcessOutput, ProcessRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
  pub chunk_size: String,
  pub transfers: u32,
}

impl Default for TransferOptions {
  fn default() -> Self {
    Self {
      chunk_size: "10M".into(),
      transfers: 10,
    }
  }
}

impl TransferOptions {
  /// Larger chunks for pulling model weights.
  pub fn model_download() -> Self {
    Self {
      chunk_size: "100M".into(),
      ..Default::default()
    }
  }
}

/// Object storage as the benchmarks see it. Transfers report success as a
/// boolean and probes report 0 on any failure; nothing here aborts the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
  async fn upload(&self, local: &Path, bucket: &str, key: &str, options: &TransferOptions) -> bool;

  async fn download(&self, bucket: &str, key: &str, local: &Path, options: &TransferOptions) -> bool;

  async fn count_remote(&self, bucket: &str, folder: &str) -> usize;

  async fn list(&self, bucket: &str, prefix: &str) -> Vec<String>;

  async fn sync_folder(&self, bucket: &str, key: &str, local: &Path) -> bool;
}

pub struct RcloneStore {
  runner: Arc<dyn ProcessRunner>,
  remote: String,
}

impl RcloneStore {
  pub fn new(runner: Arc<dyn ProcessRunner>, remote: impl Into<String>) -> Self {
    Self {
      runner,
      remote: remote.into(),
    }
  }

  pub fn remote_path(&self, bucket: &str, key: &str) -> String {
    format!("{}:{}/{}", self.remote, bucket, key)
  }

  async fn run(&self, invocation: Invocation) -> Result<ProcessOutput> {
    info!("{}", invocation.command_line());
    let output = self.runner.invoke(&invocation).await?;
    if !output.success() {
      bail!("rclone exited with {:?}: {}", output.exit_code, output.stderr.trim());
    }
    Ok(output)
  }

  async fn copyto(&self, from: &str, to: &str, options: &TransferOptions) -> bool {
    let invocation = Invocation::new("rclone").args([
      "copyto".to_string(),
      from.to_string(),
      to.to_string(),
      format!("--s3-chunk-size={}", options.chunk_size),
      format!("--transfers={}", options.transfers),
      "--ignore-times".to_string(),
    ]);
    match self.run(invocation).await {
      Ok(_) => true,
      Err(e) => {
        error!("Transfer {} -> {} failed: {:#}", from, to, e);
        false
      }
    }
  }
}

#[async_trait]
impl ObjectStore for RcloneStore {
  async fn upload(&self, local: &Path, bucket: &str, key: &str, options: &TransferOptions) -> bool {
    let from = local.display().to_string();
    self.copyto(&from, &self.remote_path(bucket, key), options).await
  }

  async fn download(&self, bucket: &str, key: &str, local: &Path, options: &TransferOptions) -> bool {
    let to = local.display().to_string();
    self.copyto(&self.remote_path(bucket, key), &to, options).await
  }

  async fn count_remote(&self, bucket: &str, folder: &str) -> usize {
    let target = self.remote_path(bucket, folder);
    match self.run(Invocation::new("rclone").args(["ls", target.as_str()])).await {
      Ok(output) => {
        let count = output.stdout.lines().filter(|l| !l.trim().is_empty()).count();
        info!("The number of files in {}/{}: {}", bucket, folder, count);
        count
      }
      Err(e) => {
        error!("Failed to list {}: {:#}", target, e);
        0
      }
    }
  }

  async fn list(&self, bucket: &str, prefix: &str) -> Vec<String> {
    let target = self.remote_path(bucket, prefix);
    match self.run(Invocation::new("rclone").args(["lsf", target.as_str()])).await {
      Ok(output) => output
        .stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(String::from)
        .collect(),
      Err(e) => {
        error!("Failed to list {}: {:#}", target, e);
        Vec::new()
      }
    }
  }

  async fn sync_folder(&self, bucket: &str, key: &str, local: &Path) -> bool {
    let from = self.remote_path(bucket, key);
    let to = local.display().to_string();
    match self.run(Invocation::new("rclone").args(["copy", from.as_str(), to.as_str()])).await {
      Ok(_) => {
        info!("Copied {} -> {} successfully", from, to);
        true
      }
      Err(e) => {
        error!("Error copying {} -> {}: {:#}", from, to, e);
        false
      }
    }
  }
}

/// Writes the rclone remote definition and returns a store bound to it.
pub fn connect(config: &StorageConfig, runner: Arc<dyn ProcessRunner>) -> Result<RcloneStore> {
  config.write()?;
  Ok(RcloneStore::new(runner, config.remote.clone()))
}

fn walk_files(root: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
  for entry in fs::read_dir(root)? {
    let entry = entry?;
    let file_type = entry.file_type()?;
    let path = entry.path();
    if file_type.is_dir() {
      walk_files(&path, files)?;
    } else if file_type.is_symlink() && fs::metadata(&path).map_or(false, |m| m.is_dir()) {
      // linked directories are neither followed nor counted
      continue;
    } else {
      files.push(path);
    }
  }
  Ok(())
}

/// Recursive file count. Absent folders and I/O errors both count as 0.
pub fn count_local_files(path: &Path) -> usize {
  let mut files = Vec::new();
  match walk_files(path, &mut files) {
    Ok(()) => {
      info!("The number of files in {}: {}", path.display(), files.len());
      files.len()
    }
    Err(e) => {
      warn!("Cannot count files in {}: {}", path.display(), e);
      0
    }
  }
}

pub fn folder_size_bytes(path: &Path) -> u64 {
  let mut files = Vec::new();
  if let Err(e) = walk_files(path, &mut files) {
    warn!("Cannot size {}: {}", path.display(), e);
  }
  files
    .iter()
    .filter_map(|f| fs::metadata(f).ok())
    .filter(|m| m.is_file())
    .map(|m| m.len())
    .sum()
}
