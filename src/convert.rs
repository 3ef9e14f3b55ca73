use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use crate::aggregate::{list_logs, LOG_SUFFIX};
use crate::models::WorkloadKind;

/// Old node label -> new node label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
  entries: HashMap<String, String>,
}

impl MappingTable {
  /// Pipe-delimited, five fields per line; the third is the key and the
  /// fourth the value. Other lines are ignored.
  pub fn parse(text: &str) -> Self {
    let mut entries = HashMap::new();
    for line in text.lines() {
      let parts: Vec<&str> = line.trim().split('|').map(str::trim).collect();
      if let [_, _, key, value, _] = parts.as_slice() {
        entries.insert(key.to_string(), value.to_string());
      }
    }
    Self { entries }
  }

  pub fn load(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path)
      .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    Ok(Self::parse(&text))
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.entries.get(key).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
  pub copied: Vec<String>,
  pub excluded: Vec<String>,
  pub unmapped: Vec<String>,
  pub rejected: Vec<String>,
}

pub struct Converter {
  mapping: MappingTable,
  excluded: HashSet<String>,
  label_pattern: Regex,
}

impl Converter {
  pub fn new<I, S>(mapping: MappingTable, excluded: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Ok(Self {
      mapping,
      excluded: excluded.into_iter().map(Into::into).collect(),
      label_pattern: Regex::new(r"^[\w.\-]+$")?,
    })
  }

  /// New labels become file names, so they must not escape the output folder.
  fn is_safe_label(&self, label: &str) -> bool {
    self.label_pattern.is_match(label) && label != "." && label != ".."
  }

  pub fn convert_folder(&self, source_root: &Path, dest_root: &Path, subfolder: &str) -> Result<ConversionReport> {
    let source = source_root.join(subfolder);
    let dest = dest_root.join(subfolder);
    let mut report = ConversionReport::default();
    if !source.is_dir() {
      warn!("{} does not exist, nothing to convert", source.display());
      return Ok(report);
    }
    fs::create_dir_all(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    for log in list_logs(&source)? {
      let file_name = match log.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => continue,
      };
      let base = file_name.strip_suffix(LOG_SUFFIX).unwrap_or(&file_name);
      let Some(target) = self.mapping.get(base) else {
        info!("{} -> NOT found in mapping. Skipping...", file_name);
        report.unmapped.push(file_name);
        continue;
      };
      if self.excluded.contains(target) {
        info!("{} -> Found in mapping: {}, which is in the removed values. Skipping...", file_name, target);
        report.excluded.push(file_name);
        continue;
      }
      if !self.is_safe_label(target) {
        warn!("{} -> Found in mapping: {}, which is not a valid node label. Skipping...", file_name, target);
        report.rejected.push(file_name);
        continue;
      }
      let output = dest.join(format!("{}{}", target, LOG_SUFFIX));
      fs::copy(&log, &output)
        .with_context(|| format!("Failed to copy {} to {}", log.display(), output.display()))?;
      info!("{} -> Found in mapping: {}", file_name, target);
      report.copied.push(file_name);
    }
    Ok(report)
  }

  pub fn convert_run(&self, source_root: &Path, dest_root: &Path) -> Result<Vec<(WorkloadKind, ConversionReport)>> {
    for kind in WorkloadKind::ALL {
      let dest = dest_root.join(kind.subfolder());
      fs::create_dir_all(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    }
    let mut reports = Vec::with_capacity(WorkloadKind::ALL.len());
    for kind in WorkloadKind::ALL {
      info!("Convert the {} log files...", kind.label());
      reports.push((kind, self.convert_folder(source_root, dest_root, kind.subfolder())?));
    }
    Ok(reports)
  }
}
