#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use node_bench::config::RunConfig;
use node_bench::driver_inference::InferenceClient;
use node_bench::health::HealthProbe;
use node_bench::process::{Invocation, ProcessOutput, ProcessRunner};
use node_bench::storage::{ObjectStore, TransferOptions};

pub fn run_config(node: &str) -> RunConfig {
  RunConfig {
    bucket: "rs-validation-test".into(),
    folder: "test-run".into(),
    task_name: "validation".into(),
    node_name: node.into(),
  }
}

/// In-memory bucket. Uploads keep the content of the local file at upload time.
#[derive(Default)]
pub struct FakeStore {
  pub remote_count: usize,
  pub download_ok: bool,
  /// Files written under the local path on a successful download.
  pub download_files: Vec<(String, Vec<u8>)>,
  pub uploads: Mutex<Vec<(String, String)>>,
  pub downloads: AtomicUsize,
}

impl FakeStore {
  pub fn with_remote_model(files: &[(&str, usize)]) -> Self {
    Self {
      remote_count: files.len(),
      download_ok: true,
      download_files: files.iter().map(|(name, size)| (name.to_string(), vec![7u8; *size])).collect(),
      ..Default::default()
    }
  }

  pub fn uploads(&self) -> Vec<(String, String)> {
    self.uploads.lock().unwrap().clone()
  }

  pub fn last_upload(&self) -> (String, String) {
    self.uploads().last().cloned().expect("nothing was uploaded")
  }

  pub fn download_calls(&self) -> usize {
    self.downloads.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ObjectStore for FakeStore {
  async fn upload(&self, local: &Path, _bucket: &str, key: &str, _options: &TransferOptions) -> bool {
    match fs::read_to_string(local) {
      Ok(content) => {
        self.uploads.lock().unwrap().push((key.to_string(), content));
        true
      }
      Err(_) => false,
    }
  }

  async fn download(&self, _bucket: &str, _key: &str, local: &Path, _options: &TransferOptions) -> bool {
    self.downloads.fetch_add(1, Ordering::SeqCst);
    if !self.download_ok {
      return false;
    }
    for (name, bytes) in &self.download_files {
      let path = local.join(name);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, bytes).unwrap();
    }
    true
  }

  async fn count_remote(&self, _bucket: &str, _folder: &str) -> usize {
    self.remote_count
  }

  async fn list(&self, _bucket: &str, _prefix: &str) -> Vec<String> {
    Vec::new()
  }

  async fn sync_folder(&self, _bucket: &str, _key: &str, _local: &Path) -> bool {
    true
  }
}

/// Records invocations and answers from a table keyed by program name.
#[derive(Default)]
pub struct FakeRunner {
  pub exit_codes: HashMap<String, i32>,
  pub unavailable: Vec<String>,
  /// Written to the invocation's output file, if it has one.
  pub log_output: String,
  pub spawn_fails: bool,
  pub invoked: Mutex<Vec<Invocation>>,
  pub spawned: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
  pub fn invoked_programs(&self) -> Vec<String> {
    self.invoked.lock().unwrap().iter().map(|i| i.command_line()).collect()
  }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
  async fn invoke(&self, invocation: &Invocation) -> Result<ProcessOutput> {
    self.invoked.lock().unwrap().push(invocation.clone());
    if self.unavailable.contains(&invocation.program) {
      bail!("Failed to spawn {}", invocation.program);
    }
    if let Some(path) = &invocation.output_file {
      fs::write(path, &self.log_output)?;
    }
    Ok(ProcessOutput {
      exit_code: Some(*self.exit_codes.get(&invocation.program).unwrap_or(&0)),
      stdout: format!("output of {}\n", invocation.command_line()),
      stderr: String::new(),
    })
  }

  fn spawn_detached(&self, invocation: &Invocation) -> Result<Option<u32>> {
    self.spawned.lock().unwrap().push(invocation.clone());
    if self.spawn_fails {
      return Err(anyhow!("Failed to spawn {}", invocation.program));
    }
    if let Some(path) = &invocation.output_file {
      fs::write(path, &self.log_output)?;
    }
    Ok(Some(4242))
  }
}

pub struct FakeProbe {
  pub failures: usize,
  pub calls: AtomicUsize,
}

impl FakeProbe {
  pub fn ready_after(failures: usize) -> Self {
    Self { failures, calls: AtomicUsize::new(0) }
  }

  pub fn never_ready() -> Self {
    Self::ready_after(usize::MAX)
  }
}

#[async_trait]
impl HealthProbe for FakeProbe {
  async fn check(&self) -> Result<()> {
    if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
      bail!("connection refused");
    }
    Ok(())
  }
}

/// Answers with a fixed token count; every `fail_every`-th call errors.
pub struct FakeClient {
  pub tokens: Option<u64>,
  pub fail_every: usize,
  pub calls: AtomicUsize,
}

impl FakeClient {
  pub fn new(tokens: Option<u64>, fail_every: usize) -> Self {
    Self { tokens, fail_every, calls: AtomicUsize::new(0) }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl InferenceClient for FakeClient {
  async fn complete(&self) -> Result<Option<u64>> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if self.fail_every != 0 && call % self.fail_every == 0 {
      bail!("request timed out");
    }
    Ok(self.tokens)
  }
}
