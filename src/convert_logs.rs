use anyhow::Result;
use tracing::info;
use node_bench::config::ConversionConfig;
use node_bench::convert::{Converter, MappingTable};

fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt::init();

  let config = ConversionConfig::from_env();
  let mapping = MappingTable::load(&config.mapping_file)?;
  println!("\n----> The number of mappings: {}", mapping.len());

  let converter = Converter::new(mapping, config.excluded_nodes.clone())?;
  for (kind, report) in converter.convert_run(&config.folder, &config.output_folder)? {
    info!(
      "{}: {} copied, {} excluded, {} unmapped, {} rejected",
      kind.label(),
      report.copied.len(),
      report.excluded.len(),
      report.unmapped.len(),
      report.rejected.len()
    );
  }
  Ok(())
}
