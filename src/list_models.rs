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
  for model in store.list(&bucket, "models").await {
    println!("{}", model);
  }
}
