use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use taxi_pipeline::config::{monthly_partitions, weekly_partitions};
use taxi_pipeline::{Granularity, PartitionKey, Pipeline, PipelineConfig, StepReport};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "taxi-pipeline",
    about = "Load NYC taxi trips into DuckDB and compute weekly and per-zone trip statistics."
)]
struct Opt {
    /// Database file. Defaults to $DUCKDB_DATABASE, then data/staging/data.duckdb
    #[structopt(long, parse(from_os_str))]
    database: Option<PathBuf>,

    /// Directory holding the raw trip and zone files
    #[structopt(long, parse(from_os_str))]
    raw_dir: Option<PathBuf>,

    /// Directory the weekly statistics are written to
    #[structopt(long, parse(from_os_str))]
    outputs_dir: Option<PathBuf>,

    /// Directory the zone statistics are written to
    #[structopt(long, parse(from_os_str))]
    staging_dir: Option<PathBuf>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Load the raw trips of one month (YYYY-MM)
    LoadTrips {
        #[structopt(long)]
        partition: String,
    },
    /// Replace the zones table
    LoadZones,
    /// Update the weekly statistics for the week starting on the given day (YYYY-MM-DD)
    TripsByWeek {
        #[structopt(long)]
        partition: String,
    },
    /// Write per-zone trip counts as GeoJSON
    ZoneStats {
        /// Borough to restrict the statistics to, `all` for the whole city
        #[structopt(long, default_value = "Manhattan")]
        borough: String,
    },
    /// Show loaded, pending and missing monthly partitions
    Partitions,
    /// Load all pending months and refresh every weekly statistic
    Backfill,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();
    if let Err(err) = run(opt) {
        log::error!("{}", err);
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn run(opt: Opt) -> taxi_pipeline::Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(database) = opt.database {
        config.database = database;
    }
    if let Some(raw_dir) = opt.raw_dir {
        config.raw_dir = raw_dir;
    }
    if let Some(outputs_dir) = opt.outputs_dir {
        config.outputs_dir = outputs_dir;
    }
    if let Some(staging_dir) = opt.staging_dir {
        config.staging_dir = staging_dir;
    }
    if let Command::ZoneStats { borough } = &opt.cmd {
        config.borough = if borough.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(borough.clone())
        };
    }
    let pipeline = Pipeline::new(config);

    match opt.cmd {
        Command::LoadTrips { partition } => {
            let month = PartitionKey::parse_as(&partition, Granularity::Monthly)?;
            print_report(&pipeline.taxi_trips(&month)?);
        }
        Command::LoadZones => print_report(&pipeline.taxi_zones()?),
        Command::TripsByWeek { partition } => {
            let week = PartitionKey::parse_as(&partition, Granularity::Weekly)?;
            print_report(&pipeline.trips_by_week(&week)?);
        }
        Command::ZoneStats { .. } => print_report(&pipeline.manhattan_stats()?),
        Command::Partitions => {
            let months = monthly_partitions();
            for loaded in pipeline.loaded_partitions()? {
                println!("loaded   {} ({} rows)", loaded.key, loaded.rows);
            }
            for month in pipeline.pending_partitions(&months)? {
                println!("pending  {}", month);
            }
            for month in pipeline.missing_raw_files(&months) {
                println!("missing  {} ({})", month, pipeline.config().trips_file(&month).display());
            }
        }
        Command::Backfill => {
            for report in pipeline.backfill(&monthly_partitions(), &weekly_partitions())? {
                print_report(&report);
            }
        }
    }
    Ok(())
}

fn print_report(report: &StepReport) {
    let partition = report.partition.as_deref().unwrap_or("-");
    match &report.output {
        Some(output) => println!("{} {}: {} rows -> {}", report.step, partition, report.rows, output.display()),
        None => println!("{} {}: {} rows", report.step, partition, report.rows),
    }
}
