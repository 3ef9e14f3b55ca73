use anyhow::Result;
use std::path::PathBuf;
use node_bench::aggregate::analyze_run;
use node_bench::config::{ProcessEnv, Vars};

fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt::init();

  let folder = PathBuf::from(ProcessEnv.get_or("FOLDER", "test200251212"));
  let mut attention = 0;
  for (kind, report) in analyze_run(&folder)? {
    println!("\n---------> Analyze the {} log files...", kind.label());
    println!("Files in {}: {}", report.path.display(), report.file_count);
    for finding in &report.findings {
      if let Some(line) = finding.render() {
        println!("{}", line);
      }
    }
    attention += report.attention().count();
  }
  println!("\n{} record(s) need attention", attention);
  Ok(())
}
