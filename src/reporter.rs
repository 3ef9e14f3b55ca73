use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use crate::config::RunConfig;
use crate::models::{StatusRecord, WorkloadKind};
use crate::storage::{ObjectStore, TransferOptions};

pub const BANNER_WIDTH: usize = 40;

/// Free-text block appended after the status record.
#[derive(Debug, Clone, PartialEq)]
pub struct Appendix {
  pub label: String,
  pub body: String,
}

impl Appendix {
  pub fn new(label: impl Into<String>, body: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      body: body.into(),
    }
  }

  pub fn banner(&self) -> String {
    format!("{}> {}", "-".repeat(BANNER_WIDTH), self.label)
  }
}

/// Pretty JSON, then each appendix separated by a blank line and its banner.
pub fn render(record: &StatusRecord, appendices: &[Appendix]) -> Result<String> {
  let mut text = record.to_pretty_json()?;
  for appendix in appendices {
    text.push_str("\n\n");
    text.push_str(&appendix.banner());
    text.push('\n');
    text.push_str(&appendix.body);
  }
  Ok(text)
}

pub struct Reporter {
  store: Arc<dyn ObjectStore>,
  local_path: PathBuf,
  bucket: String,
  key: String,
}

impl Reporter {
  pub fn new(
    store: Arc<dyn ObjectStore>,
    local_path: impl Into<PathBuf>,
    bucket: impl Into<String>,
    key: impl Into<String>,
  ) -> Self {
    Self {
      store,
      local_path: local_path.into(),
      bucket: bucket.into(),
      key: key.into(),
    }
  }

  pub fn for_workload(store: Arc<dyn ObjectStore>, local_path: impl Into<PathBuf>, run: &RunConfig, kind: WorkloadKind) -> Self {
    Self::new(store, local_path, run.bucket.clone(), kind.log_key(&run.folder, &run.node_name))
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn local_path(&self) -> &Path {
    &self.local_path
  }

  /// Overwrites the local log and pushes it. Failures are logged, never raised.
  pub async fn report(&self, record: &StatusRecord, appendices: &[Appendix]) -> bool {
    let text = match render(record, appendices) {
      Ok(text) => text,
      Err(e) => {
        error!("Failed to render status record: {:#}", e);
        return false;
      }
    };
    info!("Reporting state '{}' for {} to {}/{}", record.state, record.node_name, self.bucket, self.key);
    debug!("{}", text);

    if let Err(e) = tokio::fs::write(&self.local_path, text.as_bytes()).await {
      error!("Failed to write {}: {}", self.local_path.display(), e);
      return false;
    }
    self
      .store
      .upload(&self.local_path, &self.bucket, &self.key, &TransferOptions::default())
      .await
  }
}
