use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{info, warn};

#[async_trait]
pub trait HealthProbe: Send + Sync {
  async fn check(&self) -> Result<()>;
}

pub struct HttpHealthProbe {
  client: Client,
  url: String,
}

impl HttpHealthProbe {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
    Ok(Self {
      client: Client::builder().timeout(timeout).build()?,
      url: url.into(),
    })
  }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
  async fn check(&self) -> Result<()> {
    let response = self.client.get(&self.url).send().await?;
    if response.status() != StatusCode::OK {
      bail!("{} returned {}", self.url, response.status());
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
  pub interval: Duration,
  pub max_attempts: usize,
}

/// Polls until the probe passes or `max_attempts` checks have failed.
pub async fn wait_until_ready(probe: &dyn HealthProbe, policy: ReadinessPolicy) -> bool {
  if policy.max_attempts == 0 {
    return false;
  }
  let strategy = FixedInterval::new(policy.interval).take(policy.max_attempts - 1);
  let mut attempt = 0usize;
  let result = Retry::spawn(strategy, || {
    attempt += 1;
    let current = attempt;
    async move {
      probe.check().await.map_err(|e| {
        info!("Attempt {}: server not ready ({:#}), retrying in {:?}", current, e, policy.interval);
        e
      })
    }
  })
  .await;

  match result {
    Ok(()) => {
      info!("Server is ready");
      true
    }
    Err(e) => {
      warn!("Server did not become ready within {} attempts: {:#}", policy.max_attempts, e);
      false
    }
  }
}
