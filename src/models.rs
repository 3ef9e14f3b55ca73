use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ONLINE_UTC_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Placeholder written into elapsed-time fields until a measurement exists.
pub const UNMEASURED_S: f64 = 9999.9999;

pub fn round3(value: f64) -> f64 {
  (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
  Pending,
  Running,
  Success,
  Failure,
  Restarted,
}

impl RunState {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunState::Pending => "pending",
      RunState::Running => "running",
      RunState::Success => "success",
      RunState::Failure => "failure",
      RunState::Restarted => "restarted",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, RunState::Success | RunState::Failure | RunState::Restarted)
  }

  /// States only move forward: pending -> anything else, running -> a terminal state.
  pub fn can_transition_to(&self, next: RunState) -> bool {
    match self {
      RunState::Pending => next != RunState::Pending,
      RunState::Running => next.is_terminal(),
      _ => false,
    }
  }

  pub fn needs_attention(&self) -> bool {
    !matches!(self, RunState::Running | RunState::Success)
  }

  /// Process exit code for a driver that finished in this state.
  pub fn exit_code(&self) -> i32 {
    match self {
      RunState::Failure | RunState::Restarted => 1,
      _ => 0,
    }
  }
}

impl fmt::Display for RunState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
  ModelLoading,
  Training,
  Inference,
}

impl WorkloadKind {
  /// Order in which a run's subfolders are processed after the fact.
  pub const ALL: [WorkloadKind; 3] = [WorkloadKind::Training, WorkloadKind::ModelLoading, WorkloadKind::Inference];

  pub fn subfolder(&self) -> &'static str {
    match self {
      WorkloadKind::ModelLoading => "benchmark/model_loading",
      WorkloadKind::Training => "megatron",
      WorkloadKind::Inference => "llama",
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      WorkloadKind::ModelLoading => "model loading",
      WorkloadKind::Training => "megatron",
      WorkloadKind::Inference => "llama",
    }
  }

  pub fn log_key(&self, folder: &str, node_name: &str) -> String {
    format!("{}/{}/{}.log", folder, self.subfolder(), node_name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLoadingStats {
  pub duration_s: f64,
  #[serde(rename = "data size_GB")]
  pub data_size_gb: f64,
  #[serde(rename = "dl_throughput_Gbps")]
  pub dl_throughput_gbps: f64,
}

impl Default for ModelLoadingStats {
  fn default() -> Self {
    Self {
      duration_s: UNMEASURED_S,
      data_size_gb: 0.0,
      dl_throughput_gbps: 0.0,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
  pub command: String,
  pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceStats {
  pub model: String,
  #[serde(rename = "inference server")]
  pub inference_server: String,
  #[serde(rename = "startup time_s")]
  pub startup_time_s: f64,
  #[serde(rename = "running time_s")]
  pub running_time_s: f64,
  #[serde(rename = "inference number")]
  pub inference_number: u64,
  #[serde(rename = "generated token number")]
  pub generated_token_number: u64,
}

impl InferenceStats {
  pub fn new(model: impl Into<String>, inference_server: impl Into<String>) -> Self {
    Self {
      model: model.into(),
      inference_server: inference_server.into(),
      startup_time_s: UNMEASURED_S,
      running_time_s: 0.0,
      inference_number: 0,
      generated_token_number: 0,
    }
  }

  /// Every attempt counts; only attempts that reported usage add tokens.
  pub fn record_request(&mut self, tokens: Option<u64>, running_time_s: f64) {
    self.inference_number += 1;
    self.generated_token_number += tokens.unwrap_or(0);
    self.running_time_s = running_time_s;
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadDetails {
  ModelLoading(ModelLoadingStats),
  Training(TrainingStats),
  Inference(InferenceStats),
  #[serde(other)]
  Other,
}

impl WorkloadDetails {
  pub fn kind(&self) -> Option<WorkloadKind> {
    match self {
      WorkloadDetails::ModelLoading(_) => Some(WorkloadKind::ModelLoading),
      WorkloadDetails::Training(_) => Some(WorkloadKind::Training),
      WorkloadDetails::Inference(_) => Some(WorkloadKind::Inference),
      WorkloadDetails::Other => None,
    }
  }
}

/// The status log of one workload instance on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
  #[serde(rename = "node name")]
  pub node_name: String,
  #[serde(rename = "task name")]
  pub task_name: String,
  /// Flattened in place so `type` is written third.
  #[serde(flatten)]
  pub details: WorkloadDetails,
  #[serde(rename = "online utc")]
  pub online_utc: String,
  pub state: RunState,
  pub message: String,
}

impl StatusRecord {
  pub fn new(node_name: impl Into<String>, task_name: impl Into<String>, details: WorkloadDetails) -> Self {
    Self::new_at(node_name, task_name, details, Utc::now())
  }

  pub fn new_at(
    node_name: impl Into<String>,
    task_name: impl Into<String>,
    details: WorkloadDetails,
    online: DateTime<Utc>,
  ) -> Self {
    Self {
      node_name: node_name.into(),
      task_name: task_name.into(),
      online_utc: online.format(ONLINE_UTC_FORMAT).to_string(),
      state: RunState::Pending,
      message: String::new(),
      details,
    }
  }

  pub fn kind(&self) -> Option<WorkloadKind> {
    self.details.kind()
  }

  pub fn transition(&mut self, next: RunState, message: impl Into<String>) -> Result<()> {
    if !self.state.can_transition_to(next) {
      bail!("Illegal state transition {} -> {} for node {}", self.state, next, self.node_name);
    }
    self.state = next;
    self.message = message.into();
    Ok(())
  }

  pub fn model_loading_mut(&mut self) -> Option<&mut ModelLoadingStats> {
    match &mut self.details {
      WorkloadDetails::ModelLoading(stats) => Some(stats),
      _ => None,
    }
  }

  pub fn training_mut(&mut self) -> Option<&mut TrainingStats> {
    match &mut self.details {
      WorkloadDetails::Training(stats) => Some(stats),
      _ => None,
    }
  }

  pub fn inference_mut(&mut self) -> Option<&mut InferenceStats> {
    match &mut self.details {
      WorkloadDetails::Inference(stats) => Some(stats),
      _ => None,
    }
  }

  pub fn to_pretty_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }
}
