use std::sync::Arc;
use tracing::error;
use node_bench::config::{InferenceConfig, StorageConfig};
use node_bench::driver_inference::{ChatCompletionClient, InferenceClient, InferenceDriver};
use node_bench::health::HttpHealthProbe;
use node_bench::process::{ProcessRunner, SystemRunner};
use node_bench::storage::connect;

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt::init();

  let config = InferenceConfig::from_env();
  let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
  let store = match connect(&StorageConfig::from_env(), runner.clone()) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      error!("Failed to configure object storage: {:#}", e);
      std::process::exit(1);
    }
  };

  let probe = HttpHealthProbe::new(config.health_url.clone(), config.health_timeout);
  let client = ChatCompletionClient::new(config.completions_url.clone(), &config.model, &config.prompt, config.request_timeout);
  let (probe, client): (_, Arc<dyn InferenceClient>) = match (probe, client) {
    (Ok(probe), Ok(client)) => (probe, Arc::new(client)),
    (Err(e), _) | (_, Err(e)) => {
      error!("Failed to build HTTP clients: {:#}", e);
      std::process::exit(1);
    }
  };

  let driver = InferenceDriver::new(config, runner, store);
  let code = match driver.run(&probe, client).await {
    Ok(code) => code,
    Err(e) => {
      error!("Inference run aborted: {:#}", e);
      1
    }
  };
  std::process::exit(code);
}
