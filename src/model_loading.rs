use std::sync::Arc;
use tracing::{error, info};
use node_bench::config::{ModelLoadingConfig, StorageConfig};
use node_bench::driver_loading::ModelLoadingDriver;
use node_bench::process::SystemRunner;
use node_bench::storage::connect;

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt::init();

  let store = match connect(&StorageConfig::from_env(), Arc::new(SystemRunner)) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      error!("Failed to configure object storage: {:#}", e);
      std::process::exit(1);
    }
  };

  let driver = ModelLoadingDriver::new(ModelLoadingConfig::from_env(), store);
  let code = match driver.run().await {
    Ok(record) => {
      info!("{}", record.to_pretty_json().unwrap_or_default());
      record.state.exit_code()
    }
    Err(e) => {
      error!("Model loading aborted: {:#}", e);
      1
    }
  };
  info!("Exiting with exit code {}...", code);
  std::process::exit(code);
}
