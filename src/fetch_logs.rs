use std::path::Path;
use std::sync::Arc;
use tracing::error;
use node_bench::config::{ProcessEnv, StorageConfig, Vars};
use node_bench::process::SystemRunner;
use node_bench::storage::{connect, ObjectStore};

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt::init();

  let store = match connect(&StorageConfig::from_env(), Arc::new(SystemRunner)) {
    Ok(store) => store,
    Err(e) => {
      error!("Failed to configure object storage: {:#}", e);
      std::process::exit(1);
    }
  };
  let bucket = ProcessEnv.get_or("BUCKET", "rs-validation-test");
  let folder = ProcessEnv.get_or("FOLDER", "test200251212");

  if let Err(e) = tokio::fs::create_dir_all(&folder).await {
    error!("Failed to create {}: {}", folder, e);
    std::process::exit(1);
  }
  if !store.sync_folder(&bucket, &folder, Path::new(&folder)).await {
    std::process::exit(1);
  }
}
