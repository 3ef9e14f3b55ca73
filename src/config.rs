use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_EXCLUDED_NODES: [&str; 3] = ["atl1node59999", "atl1node59998", "atl1node59997"];

/// Source of configuration values. Binaries read the process environment,
/// tests hand in a map.
pub trait Vars {
  fn get(&self, key: &str) -> Option<String>;

  fn get_or(&self, key: &str, default: &str) -> String {
    self.get(key).unwrap_or_else(|| default.into())
  }

  fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
    self.get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
  }
}

pub struct ProcessEnv;

impl Vars for ProcessEnv {
  fn get(&self, key: &str) -> Option<String> {
    env::var(key).ok()
  }
}

impl Vars for HashMap<String, String> {
  fn get(&self, key: &str) -> Option<String> {
    HashMap::get(self, key).cloned()
  }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
  pub remote: String,
  pub provider: String,
  pub endpoint: String,
  pub region: String,
  pub access_key_id: String,
  pub secret_access_key: String,
  pub config_path: PathBuf,
}

impl StorageConfig {
  pub fn from_env() -> Self {
    Self::from_vars(&ProcessEnv)
  }

  pub fn from_vars(vars: &impl Vars) -> Self {
    let config_path = match vars.get("RCLONE_CONFIG_PATH") {
      Some(path) => PathBuf::from(path),
      None => PathBuf::from(vars.get_or("HOME", "/root")).join(".config/rclone/rclone.conf"),
    };
    Self {
      remote: "ds".into(),
      provider: "DigitalOcean".into(),
      endpoint: vars.get_or("AWS_ENDPOINT_URL", ""),
      region: vars.get_or("AWS_REGION", ""),
      access_key_id: vars.get_or("AWS_ACCESS_KEY_ID", ""),
      secret_access_key: vars.get_or("AWS_SECRET_ACCESS_KEY", ""),
      config_path,
    }
  }

  pub fn render(&self) -> String {
    format!(
      "[{}]\ntype = s3\nprovider = {}\naccess_key_id = {}\nsecret_access_key = {}\nregion = {}\nendpoint = {}\nbucket_acl = private",
      self.remote, self.provider, self.access_key_id, self.secret_access_key, self.region, self.endpoint
    )
  }

  pub fn write(&self) -> Result<()> {
    if let Some(parent) = self.config_path.parent() {
      fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&self.config_path, self.render())
      .with_context(|| format!("Failed to write rclone config {}", self.config_path.display()))?;
    info!("rclone remote '{}' configured at {}", self.remote, self.config_path.display());
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
  pub bucket: String,
  pub folder: String,
  pub task_name: String,
  pub node_name: String,
}

impl RunConfig {
  pub fn from_vars(vars: &impl Vars) -> Self {
    Self {
      bucket: vars.get_or("BUCKET", "rs-validation-test"),
      folder: vars.get_or("FOLDER", "test200251212"),
      task_name: vars.get_or("TASK_NAME", "test-model-loading-2025"),
      node_name: vars.get_or("NODE_NAME", "test-node"),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ModelLoadingConfig {
  pub run: RunConfig,
  pub model: String,
  pub model_prefix: String,
  pub model_folder: String,
  pub hf_cache_folder: PathBuf,
  pub override_existing: bool,
  pub log_file: PathBuf,
}

impl ModelLoadingConfig {
  pub fn from_env() -> Self {
    Self::from_vars(&ProcessEnv)
  }

  pub fn from_vars(vars: &impl Vars) -> Self {
    Self {
      run: RunConfig::from_vars(vars),
      model: vars.get_or("MODEL", "meta-llama/Llama-3.1-8B-Instruct"),
      model_prefix: "models".into(),
      model_folder: vars.get_or("MODEL_FOLDER", "models--meta-llama--Llama-3.1-8B-Instruct"),
      hf_cache_folder: PathBuf::from("/root/.cache/huggingface/hub"),
      override_existing: vars.parse_or::<i64>("OVERRIDE", 1) != 0,
      log_file: PathBuf::from("./final.log"),
    }
  }

  pub fn remote_model_key(&self) -> String {
    format!("{}/{}", self.model_prefix, self.model_folder)
  }

  pub fn local_path(&self) -> PathBuf {
    self.hf_cache_folder.join(&self.model_folder)
  }
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
  pub run: RunConfig,
  pub model: String,
  pub server_version: String,
  pub port: u16,
  pub tensor_parallel_size: u32,
  pub prompt: String,
  pub health_url: String,
  pub completions_url: String,
  pub health_timeout: Duration,
  pub health_interval: Duration,
  pub health_max_attempts: usize,
  pub request_timeout: Duration,
  pub request_pause: Duration,
  pub report_interval: Duration,
  pub log_file: PathBuf,
  pub server_log: PathBuf,
  pub tail_lines: usize,
}

impl InferenceConfig {
  pub fn from_env() -> Self {
    Self::from_vars(&ProcessEnv)
  }

  pub fn from_vars(vars: &impl Vars) -> Self {
    let port = 8000;
    Self {
      run: RunConfig::from_vars(vars),
      model: vars.get_or("MODEL", "meta-llama/Llama-3.1-8B-Instruct"),
      server_version: "vllm 0.11.1".into(),
      port,
      tensor_parallel_size: 8,
      prompt: "Who are you? Please tell me how to learn AI and ML, using 1000+ words".into(),
      health_url: format!("http://0.0.0.0:{}/health", port),
      completions_url: format!("http://localhost:{}/v1/chat/completions", port),
      health_timeout: Duration::from_secs(2),
      health_interval: Duration::from_secs(5),
      health_max_attempts: 180,
      request_timeout: Duration::from_secs(600),
      request_pause: Duration::from_secs(2),
      report_interval: Duration::from_secs(120),
      log_file: PathBuf::from("/app/final.log"),
      server_log: PathBuf::from("/app/vllm_server.log"),
      tail_lines: vars.parse_or("LOG_TAIL_LINES", 2000),
    }
  }

  pub fn serve_args(&self) -> Vec<String> {
    let port = self.port.to_string();
    let tp = self.tensor_parallel_size.to_string();
    [
      "serve", self.model.as_str(),
      "--enforce-eager",
      "--host", "0.0.0.0",
      "--port", port.as_str(),
      "--tensor-parallel-size", tp.as_str(),
      "--seed", "1024",
      "--dtype", "float16",
      "--max-model-len", "10000",
      "--max-num-batched-tokens", "10000",
      "--max-num-seqs", "256",
      "--trust-remote-code",
      "--gpu-memory-utilization", "0.9",
    ]
      .iter()
      .map(|s| s.to_string())
      .collect()
  }
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
  pub run: RunConfig,
  pub workspace: PathBuf,
  pub script: String,
  pub env_overrides: Vec<(String, String)>,
  pub log_file: PathBuf,
  pub training_log: PathBuf,
  pub tail_lines: usize,
}

impl TrainingConfig {
  pub fn from_env() -> Self {
    Self::from_vars(&ProcessEnv)
  }

  pub fn from_vars(vars: &impl Vars) -> Self {
    let workspace = PathBuf::from("/workspace/Megatron-LM");
    let env_overrides = [
      ("MOCK_DATA", "1"),
      ("TEE_OUTPUT", "1"),
      ("MBS", "5"),
      ("BS", "120"),
      ("TP", "8"),
      ("TE_FP8", "0"),
      ("NO_TORCH_COMPILE", "1"),
      ("SEQ_LENGTH", "4096"),
      ("TOTAL_ITERS", "12"),
    ]
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    Self {
      run: RunConfig::from_vars(vars),
      log_file: workspace.join("final.log"),
      training_log: workspace.join("megatron.log"),
      workspace,
      script: "examples/llama/train_llama2.sh".into(),
      env_overrides,
      tail_lines: vars.parse_or("LOG_TAIL_LINES", 2000),
    }
  }

  /// The launch command as recorded in the status log.
  pub fn command_line(&self) -> String {
    let overrides: Vec<String> = self.env_overrides.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{} bash {}", overrides.join(" "), self.workspace.join(&self.script).display())
  }
}

#[derive(Debug, Clone)]
pub struct ConversionConfig {
  pub folder: PathBuf,
  pub output_folder: PathBuf,
  pub mapping_file: PathBuf,
  pub excluded_nodes: Vec<String>,
}

impl ConversionConfig {
  pub fn from_env() -> Self {
    Self::from_vars(&ProcessEnv)
  }

  pub fn from_vars(vars: &impl Vars) -> Self {
    let folder = vars.get_or("FOLDER", "test200251212");
    let excluded_nodes = match vars.get("EXCLUDED_NODES") {
      Some(list) => list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
      None => DEFAULT_EXCLUDED_NODES.iter().map(|s| s.to_string()).collect(),
    };
    Self {
      output_folder: PathBuf::from(format!("{}_converted", folder)),
      folder: PathBuf::from(folder),
      mapping_file: PathBuf::from(vars.get_or("MAPPING_FILE", "mapping.txt")),
      excluded_nodes,
    }
  }
}
