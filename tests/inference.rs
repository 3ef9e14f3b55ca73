mod common;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use common::{run_config, FakeClient, FakeProbe, FakeRunner, FakeStore};
use node_bench::aggregate::parse_status_block;
use node_bench::config::{InferenceConfig, Vars};
use node_bench::driver_inference::{drain_deltas, spawn_request_loop, InferenceDelta, InferenceDriver};
use node_bench::models::{RunState, WorkloadDetails};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn config(root: &Path) -> InferenceConfig {
  let mut config = InferenceConfig::from_vars(&HashMap::<String, String>::new());
  config.run = run_config("atl1node4");
  config.health_max_attempts = 6;
  config.log_file = root.join("final.log");
  config.server_log = root.join("vllm_server.log");
  config.tail_lines = 1;
  config
}

fn stats(record: &node_bench::models::StatusRecord) -> node_bench::models::InferenceStats {
  match &record.details {
    WorkloadDetails::Inference(stats) => stats.clone(),
    other => panic!("unexpected details {:?}", other),
  }
}

#[tokio::test(start_paused = true)]
async fn ready_server_moves_to_running() {
  let dir = tempfile::tempdir().unwrap();
  let runner = Arc::new(FakeRunner::default());
  let store = Arc::new(FakeStore::default());
  let driver = InferenceDriver::new(config(dir.path()), runner.clone(), store.clone());
  let probe = FakeProbe::ready_after(2);

  let mut record = driver.new_record();
  driver.start(&mut record, &probe, Instant::now()).await.unwrap();

  assert_eq!(record.state, RunState::Running);
  let startup = stats(&record).startup_time_s;
  assert!((10.0..11.0).contains(&startup), "startup time {}", startup);

  let spawned = runner.spawned.lock().unwrap();
  assert_eq!(spawned.len(), 1);
  assert_eq!(spawned[0].program, "vllm");
  assert_eq!(&spawned[0].args[..2], &["serve".to_string(), "meta-llama/Llama-3.1-8B-Instruct".to_string()]);
  assert!(spawned[0].env.contains(&("VLLM_USE_V1".to_string(), "1".to_string())));

  let uploads = store.uploads();
  assert_eq!(uploads.len(), 2);
  assert_eq!(uploads[0].0, "test-run/llama/atl1node4.log");
  assert_eq!(parse_status_block(&uploads[0].1).unwrap().state, RunState::Pending);
  assert_eq!(parse_status_block(&uploads[1].1).unwrap().state, RunState::Running);
}

#[tokio::test(start_paused = true)]
async fn server_that_never_becomes_ready_is_restarted() {
  let dir = tempfile::tempdir().unwrap();
  let store = Arc::new(FakeStore::default());
  let driver = InferenceDriver::new(config(dir.path()), Arc::new(FakeRunner::default()), store.clone());
  let probe = FakeProbe::never_ready();
  let client = Arc::new(FakeClient::new(Some(10), 0));

  let code = driver.run(&probe, client.clone()).await.unwrap();

  assert_eq!(code, 1);
  assert_eq!(probe.calls.load(std::sync::atomic::Ordering::SeqCst), 6);
  assert_eq!(client.calls(), 0);
  let (_, content) = store.last_upload();
  let record = parse_status_block(&content).unwrap();
  assert_eq!(record.state, RunState::Restarted);
  assert_eq!(record.message, "Cannot start in 0 minutes");
}

#[tokio::test(start_paused = true)]
async fn default_policy_gives_fifteen_minutes() {
  let dir = tempfile::tempdir().unwrap();
  let mut config = config(dir.path());
  config.health_max_attempts = 180;
  let store = Arc::new(FakeStore::default());
  let driver = InferenceDriver::new(config, Arc::new(FakeRunner::default()), store.clone());

  let mut record = driver.new_record();
  driver.start(&mut record, &FakeProbe::never_ready(), Instant::now()).await.unwrap();
  assert_eq!(record.state, RunState::Restarted);
  assert_eq!(record.message, "Cannot start in 15 minutes");
}

#[tokio::test(start_paused = true)]
async fn launch_failure_is_restarted_without_polling() {
  let dir = tempfile::tempdir().unwrap();
  let runner = Arc::new(FakeRunner { spawn_fails: true, ..Default::default() });
  let driver = InferenceDriver::new(config(dir.path()), runner, Arc::new(FakeStore::default()));
  let probe = FakeProbe::ready_after(0);

  let mut record = driver.new_record();
  driver.start(&mut record, &probe, Instant::now()).await.unwrap();
  assert_eq!(record.state, RunState::Restarted);
  assert_eq!(probe.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deltas_fold_into_the_record() {
  let dir = tempfile::tempdir().unwrap();
  let driver = InferenceDriver::new(config(dir.path()), Arc::new(FakeRunner::default()), Arc::new(FakeStore::default()));
  let mut record = driver.new_record();
  let (tx, mut rx) = mpsc::unbounded_channel();
  tx.send(InferenceDelta { tokens: Some(500), running_time_s: 12.0 }).unwrap();
  tx.send(InferenceDelta { tokens: None, running_time_s: 14.0 }).unwrap();
  tx.send(InferenceDelta { tokens: Some(250), running_time_s: 16.5 }).unwrap();

  assert_eq!(drain_deltas(&mut record, &mut rx), 3);
  let stats = stats(&record);
  assert_eq!(stats.inference_number, 3);
  assert_eq!(stats.generated_token_number, 750);
  assert_eq!(stats.running_time_s, 16.5);
  assert_eq!(drain_deltas(&mut record, &mut rx), 0);
}

#[tokio::test(start_paused = true)]
async fn request_loop_stops_when_reporting_side_hangs_up() {
  let client = Arc::new(FakeClient::new(Some(10), 0));
  let (tx, rx) = mpsc::unbounded_channel();
  let handle = spawn_request_loop(client.clone(), Duration::from_secs(2), Instant::now(), tx);
  tokio::time::sleep(Duration::from_secs(5)).await;
  drop(rx);
  handle.await.unwrap();
  assert!(client.calls() >= 3);
}

#[tokio::test(start_paused = true)]
async fn periodic_reports_carry_counters_and_logs() {
  let dir = tempfile::tempdir().unwrap();
  let runner = Arc::new(FakeRunner {
    log_output: "INFO Started server process\nINFO Avg generation throughput: 512.0 tokens/s\n".into(),
    ..Default::default()
  });
  let store = Arc::new(FakeStore::default());
  let driver = InferenceDriver::new(config(dir.path()), runner, store.clone());

  let started = Instant::now();
  let mut record = driver.new_record();
  driver.start(&mut record, &FakeProbe::ready_after(0), started).await.unwrap();
  assert_eq!(record.state, RunState::Running);

  let client = Arc::new(FakeClient::new(Some(100), 4));
  let (tx, mut rx) = mpsc::unbounded_channel();
  let requests = spawn_request_loop(client.clone(), Duration::from_secs(2), started, tx);
  driver.run_reporting(&mut record, &mut rx, Some(2)).await;
  drop(rx);
  requests.await.unwrap();

  let stats = stats(&record);
  assert!(stats.inference_number >= 100, "only {} requests", stats.inference_number);
  let failed = stats.inference_number / 4;
  assert!(stats.generated_token_number >= (stats.inference_number - failed - 1) * 100);
  assert!(stats.generated_token_number <= (stats.inference_number - failed + 1) * 100);
  assert!(stats.running_time_s > 200.0);

  let uploads = store.uploads();
  assert_eq!(uploads.len(), 4);
  let (_, last) = &uploads[3];
  let reported = parse_status_block(last).unwrap();
  assert_eq!(reported.state, RunState::Running);
  let reported_stats = crate::stats(&reported);
  assert_eq!(reported_stats.inference_number, stats.inference_number);
  assert_eq!(reported_stats.generated_token_number, stats.generated_token_number);
  assert!(last.contains("> rocm-smi\noutput of rocm-smi\n"));
  assert!(last.ends_with("> Inference Logs\nINFO Avg generation throughput: 512.0 tokens/s\n"));
}

#[test]
fn config_reads_tail_length_from_env_map() {
  let vars: HashMap<String, String> = HashMap::from([("LOG_TAIL_LINES".to_string(), "50".to_string())]);
  assert_eq!(InferenceConfig::from_vars(&vars).tail_lines, 50);
  assert_eq!(vars.get_or("MODEL", "fallback"), "fallback");
}
