use anyhow::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use crate::config::ModelLoadingConfig;
use crate::models::{round3, ModelLoadingStats, RunState, StatusRecord, WorkloadDetails, WorkloadKind};
use crate::reporter::Reporter;
use crate::storage::{count_local_files, folder_size_bytes, ObjectStore, TransferOptions};

/// Gbps from gigabytes moved over seconds elapsed; 0 when nothing was timed.
pub fn throughput_gbps(size_gb: f64, duration_s: f64) -> f64 {
  if duration_s <= 0.0 {
    return 0.0;
  }
  round3(size_gb * 8.0 / duration_s)
}

pub struct ModelLoadingDriver {
  config: ModelLoadingConfig,
  store: Arc<dyn ObjectStore>,
  reporter: Reporter,
}

impl ModelLoadingDriver {
  pub fn new(config: ModelLoadingConfig, store: Arc<dyn ObjectStore>) -> Self {
    let reporter = Reporter::for_workload(store.clone(), config.log_file.clone(), &config.run, WorkloadKind::ModelLoading);
    Self { config, store, reporter }
  }

  pub fn new_record(&self) -> StatusRecord {
    StatusRecord::new(
      self.config.run.node_name.clone(),
      self.config.run.task_name.clone(),
      WorkloadDetails::ModelLoading(ModelLoadingStats::default()),
    )
  }

  /// Runs the load and uploads the final record. The returned record is
  /// always in a terminal state.
  pub async fn run(&self) -> Result<StatusRecord> {
    let started = Instant::now();
    let mut record = self.new_record();

    self.fetch_model(&mut record).await?;

    let duration_s = round3(started.elapsed().as_secs_f64());
    let success = record.state == RunState::Success;
    let local_path = self.config.local_path();
    if let Some(stats) = record.model_loading_mut() {
      stats.duration_s = duration_s;
      if success {
        stats.data_size_gb = round3(folder_size_bytes(&local_path) as f64 / 1e9);
        stats.dl_throughput_gbps = throughput_gbps(stats.data_size_gb, duration_s);
      }
    }

    self.reporter.report(&record, &[]).await;
    Ok(record)
  }

  async fn fetch_model(&self, record: &mut StatusRecord) -> Result<()> {
    let bucket = &self.config.run.bucket;
    let remote = self.config.remote_model_key();
    let local = self.config.local_path();

    if self.store.count_remote(bucket, &remote).await == 0 {
      let message = format!("The model folder {}/{} does not exist or is empty!", bucket, remote);
      warn!("{}", message);
      return record.transition(RunState::Failure, message);
    }

    if !self.config.override_existing && count_local_files(&local) != 0 {
      let message = format!("The local model folder {} already exists!", local.display());
      info!("{}", message);
      return record.transition(RunState::Success, message);
    }

    if local.is_dir() {
      if let Err(e) = tokio::fs::remove_dir_all(&local).await {
        let message = format!("Failed to clear the local model folder {}: {}", local.display(), e);
        warn!("{}", message);
        return record.transition(RunState::Failure, message);
      }
    }

    let failed = format!("Failed to download the model folder {}/{} to local path {}!", bucket, remote, local.display());
    if !self.store.download(bucket, &remote, &local, &TransferOptions::model_download()).await {
      warn!("{}", failed);
      return record.transition(RunState::Failure, failed);
    }

    if count_local_files(&local) == 0 {
      warn!("{}", failed);
      return record.transition(RunState::Failure, failed);
    }

    let message = format!("Successfully downloaded the model to local path {}!", local.display());
    info!("{}", message);
    record.transition(RunState::Success, message)
  }
}
