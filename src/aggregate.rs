use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use crate::models::{RunState, StatusRecord, WorkloadDetails, WorkloadKind};
use crate::storage::count_local_files;

pub const LOG_SUFFIX: &str = ".log";

/// Parses the JSON block at the top of a status log. Everything after the
/// first blank line is telemetry and is ignored.
pub fn parse_status_block(text: &str) -> Result<StatusRecord> {
  let block: Vec<&str> = text.lines().take_while(|line| !line.trim().is_empty()).collect();
  serde_json::from_str(&block.join("\n")).context("Malformed status record")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
  Summary { node: String, line: String },
  Attention { node: String, state: RunState, message: String },
  Malformed { file: String, error: String },
  Skipped { node: String },
}

impl Finding {
  pub fn is_attention(&self) -> bool {
    matches!(self, Finding::Attention { .. } | Finding::Malformed { .. })
  }

  pub fn render(&self) -> Option<String> {
    match self {
      Finding::Summary { line, .. } => Some(line.clone()),
      Finding::Attention { node, state, message } => Some(format!("Attention: {} {} {}", node, state, message)),
      Finding::Malformed { file, error } => Some(format!("Attention: {} unreadable ({})", file, error)),
      Finding::Skipped { .. } => None,
    }
  }
}

pub fn classify(record: &StatusRecord) -> Finding {
  let node = record.node_name.clone();
  if record.state.needs_attention() {
    return Finding::Attention {
      node,
      state: record.state,
      message: record.message.clone(),
    };
  }
  let line = match &record.details {
    WorkloadDetails::Training(stats) => {
      format!("Node: {}, Training Time: {:?} seconds", node, stats.duration_s)
    }
    WorkloadDetails::ModelLoading(stats) => format!(
      "Node: {}, Data Size: {:?} GB, Duration: {:?} seconds, Throughput: {:?} Gbps",
      node, stats.data_size_gb, stats.duration_s, stats.dl_throughput_gbps
    ),
    WorkloadDetails::Inference(stats) => format!(
      "Node: {}, Startup Time: {:?} seconds, Running Time: {:?} seconds, Inference Number: {}, Generated Token Number: {}",
      node, stats.startup_time_s, stats.running_time_s, stats.inference_number, stats.generated_token_number
    ),
    WorkloadDetails::Other => return Finding::Skipped { node },
  };
  Finding::Summary { node, line }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderReport {
  pub path: PathBuf,
  pub file_count: usize,
  pub findings: Vec<Finding>,
}

impl FolderReport {
  pub fn attention(&self) -> impl Iterator<Item = &Finding> {
    self.findings.iter().filter(|f| f.is_attention())
  }
}

/// `*.log` files directly inside `dir`, sorted by name.
pub fn list_logs(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut logs = Vec::new();
  for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
    let path = entry?.path();
    let is_log = path
      .file_name()
      .and_then(|n| n.to_str())
      .map_or(false, |n| n.ends_with(LOG_SUFFIX));
    if is_log && path.is_file() {
      logs.push(path);
    }
  }
  logs.sort();
  Ok(logs)
}

pub fn analyze_folder(root: &Path, kind: WorkloadKind) -> Result<FolderReport> {
  let path = root.join(kind.subfolder());
  let file_count = count_local_files(&path);
  let mut report = FolderReport {
    path: path.clone(),
    file_count,
    findings: Vec::new(),
  };
  if file_count == 0 {
    return Ok(report);
  }

  for log in list_logs(&path)? {
    let file = log.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let parsed = fs::read_to_string(&log)
      .with_context(|| format!("Failed to read {}", log.display()))
      .and_then(|text| parse_status_block(&text));
    let finding = match parsed {
      Ok(record) => classify(&record),
      Err(e) => {
        warn!("Skipping {}: {:#}", log.display(), e);
        Finding::Malformed { file, error: format!("{:#}", e) }
      }
    };
    report.findings.push(finding);
  }
  Ok(report)
}

pub fn analyze_run(root: &Path) -> Result<Vec<(WorkloadKind, FolderReport)>> {
  let mut reports = Vec::with_capacity(WorkloadKind::ALL.len());
  for kind in WorkloadKind::ALL {
    reports.push((kind, analyze_folder(root, kind)?));
  }
  Ok(reports)
}
