use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use crate::process::{Invocation, ProcessRunner};
use crate::reporter::Appendix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuProbe {
  pub label: &'static str,
  pub program: &'static str,
  pub args: &'static [&'static str],
}

pub const ROCM_SMI: GpuProbe = GpuProbe { label: "rocm-smi", program: "rocm-smi", args: &[] };
pub const AMD_SMI_VERSION: GpuProbe = GpuProbe { label: "amd-smi version", program: "amd-smi", args: &["version"] };
pub const ROCM_SMI_PRODUCT: GpuProbe = GpuProbe {
  label: "rocm-smi --showproduct",
  program: "rocm-smi",
  args: &["--showproduct"],
};

pub const INFERENCE_PROBES: [GpuProbe; 3] = [ROCM_SMI, AMD_SMI_VERSION, ROCM_SMI_PRODUCT];
pub const TRAINING_PROBES: [GpuProbe; 3] = [AMD_SMI_VERSION, ROCM_SMI, ROCM_SMI_PRODUCT];

/// Runs the vendor tools and keeps their raw stdout. Nothing is parsed.
pub struct TelemetryCollector {
  runner: Arc<dyn ProcessRunner>,
  probes: Vec<GpuProbe>,
  timeout: Duration,
}

impl TelemetryCollector {
  pub fn new(runner: Arc<dyn ProcessRunner>, probes: &[GpuProbe]) -> Self {
    Self {
      runner,
      probes: probes.to_vec(),
      timeout: Duration::from_secs(60),
    }
  }

  pub async fn collect(&self) -> Vec<Appendix> {
    let mut appendices = Vec::with_capacity(self.probes.len());
    for probe in &self.probes {
      let invocation = Invocation::new(probe.program)
        .args(probe.args.iter().copied())
        .timeout(self.timeout);
      let body = match self.runner.invoke(&invocation).await {
        Ok(output) => output.stdout,
        Err(e) => {
          warn!("{} unavailable: {:#}", probe.label, e);
          format!("{:#}", e)
        }
      };
      appendices.push(Appendix::new(probe.label, body));
    }
    appendices
  }
}

pub fn tail_lines(text: &str, max_lines: usize) -> String {
  if max_lines == 0 {
    return String::new();
  }
  let body = text.strip_suffix('\n').unwrap_or(text);
  let mut seen = 0;
  for (idx, _) in body.rmatch_indices('\n') {
    seen += 1;
    if seen == max_lines {
      return text[idx + 1..].to_string();
    }
  }
  text.to_string()
}

/// Last `max_lines` of a workload's own log; empty when it cannot be read.
pub async fn log_tail(path: &Path, max_lines: usize) -> String {
  match tokio::fs::read(path).await {
    Ok(bytes) => tail_lines(&String::from_utf8_lossy(&bytes), max_lines),
    Err(e) => {
      warn!("Cannot read {}: {}", path.display(), e);
      String::new()
    }
  }
}
