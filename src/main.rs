use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;

use chunksched::model::lp::write_lp;
use chunksched::*;

#[derive(Parser)]
#[command(
    name = "chunksched",
    about = "Place chunks on machines and schedule access slots before job deadlines",
    version
)]
struct Args {
    /// Workload file: storage capacity, throughput capacity and job count,
    /// then two lines per job
    workload: PathBuf,
    /// Override the candidate machine bound derived from total demand
    #[arg(long)]
    max_machines: Option<usize>,
    /// Give up after this many seconds
    #[arg(long)]
    time_limit: Option<u64>,
    /// Give up after exploring this many search nodes
    #[arg(long)]
    node_limit: Option<usize>,
    /// Also write the model in CPLEX LP format
    #[arg(long)]
    lp_out: Option<PathBuf>,
    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let (capacities, workload) = Workload::read(&args.workload)
        .with_context(|| format!("loading workload {}", args.workload.display()))?;
    info!(
        "Loaded {} jobs over {} chunks (storage {}, throughput {})",
        workload.num_jobs(),
        workload.chunks().len(),
        capacities.storage,
        capacities.throughput
    );

    let mut builder = ModelBuilder::new(&workload, capacities);
    if let Some(machines) = args.max_machines {
        builder = builder.machine_bound(machines);
    }
    let model = builder.build()?;

    if let Some(path) = &args.lp_out {
        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        );
        write_lp(&model, &mut out)?;
        out.flush()?;
        info!("Wrote model to {}", path.display());
    }

    let mut options = SolveOptions::default();
    if let Some(secs) = args.time_limit {
        options = options.with_time_limit(Duration::from_secs(secs));
    }
    if let Some(nodes) = args.node_limit {
        options = options.with_node_limit(nodes);
    }
    let solution = BranchAndBound.solve(&model, &options);
    let plan = extract_plan(&model, &solution)?;
    plan.verify(&workload, capacities)
        .context("extracted plan failed verification")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", plan);
    }
    Ok(())
}
