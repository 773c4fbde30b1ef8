use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use cvfem_rs::numerics::timing;
use cvfem_rs::processing::csv_writer;
use cvfem_rs::processing::summary::AssemblySummary;
use cvfem_rs::realm::{Realm, SimulationConfig};

const DEFAULT_INPUT: &str = "demos/heat_cube.yaml";

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let input = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT));
    log::info!("reading {}", input.display());
    let config = SimulationConfig::load(&input)?;

    let out_dir = &config.output.directory;
    fs::create_dir_all(out_dir)?;

    timing::reset_timing();
    let start = Instant::now();

    let mut realm = Realm::new(&config.realm)?;
    realm.initialize_connectivity()?;
    let report = realm.assemble()?;

    let elapsed = start.elapsed();

    let summary = AssemblySummary::from_realm(&realm, report);
    let summary_path = out_dir.join("assembly_summary.txt");
    summary.write_to_file(&summary_path)?;
    summary.print_to_console();

    let csv_path = out_dir.join("nodal_fields.csv");
    csv_writer::write_nodal_fields(&csv_path, &realm)?;

    println!("Summary saved to {}", summary_path.display());
    println!("Nodal fields saved to {}", csv_path.display());

    timing::finalize_and_print(elapsed);
    Ok(())
}
