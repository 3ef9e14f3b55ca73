use anyhow::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};
use crate::config::TrainingConfig;
use crate::models::{round3, RunState, StatusRecord, TrainingStats, WorkloadDetails, WorkloadKind};
use crate::process::{Invocation, ProcessRunner};
use crate::reporter::{Appendix, Reporter};
use crate::storage::ObjectStore;
use crate::telemetry::{log_tail, TelemetryCollector, TRAINING_PROBES};

pub struct TrainingDriver {
  config: TrainingConfig,
  runner: Arc<dyn ProcessRunner>,
  reporter: Reporter,
  telemetry: TelemetryCollector,
}

impl TrainingDriver {
  pub fn new(config: TrainingConfig, runner: Arc<dyn ProcessRunner>, store: Arc<dyn ObjectStore>) -> Self {
    let reporter = Reporter::for_workload(store, config.log_file.clone(), &config.run, WorkloadKind::Training);
    let telemetry = TelemetryCollector::new(runner.clone(), &TRAINING_PROBES);
    Self { config, runner, reporter, telemetry }
  }

  pub fn new_record(&self) -> StatusRecord {
    StatusRecord::new(
      self.config.run.node_name.clone(),
      self.config.run.task_name.clone(),
      WorkloadDetails::Training(TrainingStats {
        command: self.config.command_line(),
        duration_s: 0.0,
      }),
    )
  }

  pub fn invocation(&self) -> Invocation {
    let mut invocation = Invocation::new("bash")
      .arg(self.config.script.clone())
      .current_dir(&self.config.workspace)
      .output_to(&self.config.training_log);
    for (key, value) in &self.config.env_overrides {
      invocation = invocation.env(key.clone(), value.clone());
    }
    invocation
  }

  /// Blocks until the launcher exits, then reports once with telemetry.
  pub async fn run(&self) -> Result<StatusRecord> {
    let mut record = self.new_record();
    info!("Report the initial state...");
    self.reporter.report(&record, &[]).await;

    info!("Starting training...");
    let started = Instant::now();
    let outcome = self.runner.invoke(&self.invocation()).await;
    let duration_s = round3(started.elapsed().as_secs_f64());
    if let Some(stats) = record.training_mut() {
      stats.duration_s = duration_s;
    }

    match outcome {
      Ok(output) if output.success() => {
        info!("Training finished successfully in {}s", duration_s);
        record.transition(RunState::Success, "")?;
      }
      Ok(output) => {
        let message = format!("The training failed with return code {}", output.exit_code.unwrap_or(-1));
        error!("{}", message);
        record.transition(RunState::Failure, message)?;
      }
      Err(e) => {
        let message = format!("The training could not be started: {:#}", e);
        error!("{}", message);
        record.transition(RunState::Failure, message)?;
      }
    }

    let mut appendices = self.telemetry.collect().await;
    appendices.push(Appendix::new(
      "Training Logs",
      log_tail(&self.config.training_log, self.config.tail_lines).await,
    ));
    info!("Report the final results...");
    self.reporter.report(&record, &appendices).await;
    Ok(record)
  }
}
