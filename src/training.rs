use std::sync::Arc;
use tracing::{error, info};
use node_bench::config::{StorageConfig, TrainingConfig};
use node_bench::driver_training::TrainingDriver;
use node_bench::process::{ProcessRunner, SystemRunner};
use node_bench::storage::connect;

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt::init();

  let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
  let store = match connect(&StorageConfig::from_env(), runner.clone()) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      error!("Failed to configure object storage: {:#}", e);
      std::process::exit(1);
    }
  };

  let driver = TrainingDriver::new(TrainingConfig::from_env(), runner, store);
  let code = match driver.run().await {
    Ok(record) => {
      info!("{}", record.to_pretty_json().unwrap_or_default());
      record.state.exit_code()
    }
    Err(e) => {
      error!("Training run aborted: {:#}", e);
      1
    }
  };
  info!("Exiting...");
  std::process::exit(code);
}
