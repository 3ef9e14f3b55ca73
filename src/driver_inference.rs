use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use crate::config::InferenceConfig;
use crate::health::{wait_until_ready, HealthProbe, ReadinessPolicy};
use crate::models::{round3, InferenceStats, RunState, StatusRecord, WorkloadDetails, WorkloadKind};
use crate::process::{Invocation, ProcessRunner};
use crate::reporter::{Appendix, Reporter};
use crate::storage::ObjectStore;
use crate::telemetry::{log_tail, TelemetryCollector, INFERENCE_PROBES};

/// One finished request, sent from the request loop to the reporting loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceDelta {
  pub tokens: Option<u64>,
  pub running_time_s: f64,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
  /// Total tokens reported by the server, `None` when it reported no usage.
  async fn complete(&self) -> Result<Option<u64>>;
}

#[derive(Deserialize)]
struct CompletionResponse {
  usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Usage {
  total_tokens: Option<u64>,
}

pub struct ChatCompletionClient {
  client: Client,
  url: String,
  payload: Value,
}

impl ChatCompletionClient {
  pub fn new(url: impl Into<String>, model: &str, prompt: &str, timeout: Duration) -> Result<Self> {
    Ok(Self {
      client: Client::builder().timeout(timeout).build()?,
      url: url.into(),
      payload: json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
      }),
    })
  }
}

#[async_trait]
impl InferenceClient for ChatCompletionClient {
  async fn complete(&self) -> Result<Option<u64>> {
    let response = self.client.post(&self.url).json(&self.payload).send().await?;
    if response.status() != StatusCode::OK {
      bail!("Failed with status code {}", response.status());
    }
    let body: CompletionResponse = response.json().await?;
    Ok(body.usage.and_then(|u| u.total_tokens))
  }
}

/// Issues requests back to back until the reporting side hangs up.
pub fn spawn_request_loop(
  client: Arc<dyn InferenceClient>,
  pause: Duration,
  started: Instant,
  deltas: UnboundedSender<InferenceDelta>,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      let tokens = match client.complete().await {
        Ok(Some(tokens)) => {
          info!("Success, tokens returned: {}", tokens);
          Some(tokens)
        }
        Ok(None) => {
          warn!("Success, but no token usage returned");
          None
        }
        Err(e) => {
          warn!("Inference request failed: {:#}", e);
          None
        }
      };
      let delta = InferenceDelta {
        tokens,
        running_time_s: round3(started.elapsed().as_secs_f64()),
      };
      if deltas.send(delta).is_err() {
        debug!("Reporting loop is gone, stopping requests");
        break;
      }
      sleep(pause).await;
    }
  })
}

pub fn drain_deltas(record: &mut StatusRecord, deltas: &mut UnboundedReceiver<InferenceDelta>) -> usize {
  let mut applied = 0;
  while let Ok(delta) = deltas.try_recv() {
    if let Some(stats) = record.inference_mut() {
      stats.record_request(delta.tokens, delta.running_time_s);
    }
    applied += 1;
  }
  applied
}

pub struct InferenceDriver {
  config: InferenceConfig,
  runner: Arc<dyn ProcessRunner>,
  reporter: Reporter,
  telemetry: TelemetryCollector,
}

impl InferenceDriver {
  pub fn new(config: InferenceConfig, runner: Arc<dyn ProcessRunner>, store: Arc<dyn ObjectStore>) -> Self {
    let reporter = Reporter::for_workload(store, config.log_file.clone(), &config.run, WorkloadKind::Inference);
    let telemetry = TelemetryCollector::new(runner.clone(), &INFERENCE_PROBES);
    Self { config, runner, reporter, telemetry }
  }

  pub fn new_record(&self) -> StatusRecord {
    StatusRecord::new(
      self.config.run.node_name.clone(),
      self.config.run.task_name.clone(),
      WorkloadDetails::Inference(InferenceStats::new(self.config.model.clone(), self.config.server_version.clone())),
    )
  }

  pub fn server_invocation(&self) -> Invocation {
    Invocation::new("vllm")
      .args(self.config.serve_args())
      .env("VLLM_USE_V1", "1")
      .output_to(&self.config.server_log)
  }

  fn readiness(&self) -> ReadinessPolicy {
    ReadinessPolicy {
      interval: self.config.health_interval,
      max_attempts: self.config.health_max_attempts,
    }
  }

  /// Launches the server and waits for it. Leaves the record `running` or
  /// `restarted`; both outcomes are uploaded.
  pub async fn start(&self, record: &mut StatusRecord, probe: &dyn HealthProbe, started: Instant) -> Result<()> {
    info!("Report the initial state...");
    self.reporter.report(record, &[]).await;

    info!("Starting the vllm inference server...");
    let ready = match self.runner.spawn_detached(&self.server_invocation()) {
      Ok(_) => wait_until_ready(probe, self.readiness()).await,
      Err(e) => {
        error!("Cannot launch the inference server: {:#}", e);
        false
      }
    };

    if ready {
      if let Some(stats) = record.inference_mut() {
        stats.startup_time_s = round3(started.elapsed().as_secs_f64());
      }
      record.transition(RunState::Running, "")?;
    } else {
      let minutes = (self.config.health_interval * self.config.health_max_attempts as u32).as_secs() / 60;
      record.transition(RunState::Restarted, format!("Cannot start in {} minutes", minutes))?;
    }

    info!("Report the {} state...", record.state);
    self.reporter.report(record, &[]).await;
    Ok(())
  }

  /// Folds in finished requests and uploads the record with telemetry.
  pub async fn report_cycle(&self, record: &mut StatusRecord, deltas: &mut UnboundedReceiver<InferenceDelta>) -> bool {
    drain_deltas(record, deltas);
    let mut appendices = self.telemetry.collect().await;
    appendices.push(Appendix::new(
      "Inference Logs",
      log_tail(&self.config.server_log, self.config.tail_lines).await,
    ));
    let uploaded = self.reporter.report(record, &appendices).await;
    info!("Running...");
    uploaded
  }

  /// Periodic reporting; `max_cycles` of `None` runs until the process exits.
  pub async fn run_reporting(
    &self,
    record: &mut StatusRecord,
    deltas: &mut UnboundedReceiver<InferenceDelta>,
    max_cycles: Option<usize>,
  ) {
    let mut cycles = 0;
    while max_cycles.map_or(true, |max| cycles < max) {
      sleep(self.config.report_interval).await;
      self.report_cycle(record, deltas).await;
      cycles += 1;
    }
  }

  /// Full lifecycle. Returns the process exit code only when the server
  /// never became ready; otherwise reports forever.
  pub async fn run(&self, probe: &dyn HealthProbe, client: Arc<dyn InferenceClient>) -> Result<i32> {
    let started = Instant::now();
    let mut record = self.new_record();
    self.start(&mut record, probe, started).await?;
    if record.state != RunState::Running {
      warn!("Server not ready in time. Exiting to trigger a restart...");
      return Ok(1);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _requests = spawn_request_loop(client, self.config.request_pause, started, tx);
    info!("Inference loop started and running in the background...");
    self.run_reporting(&mut record, &mut rx, None).await;
    Ok(0)
  }
}
