//! Tradeoff Simulation Engine CLI
//!
//! ## Usage
//!
//! ```bash
//! # Run from a config file (line-based or .json)
//! tradeoff-sim run configs/kjd1.cfg
//!
//! # Run one policy on jobs/<job_set>.txt, writing results/<policy>_<job_set>.txt
//! tradeoff-sim bench kjd2 mixed 10 --param 0.5
//!
//! # Compare the bounded policies over a range of epsilons
//! tradeoff-sim sweep mixed 10 --json sweep.json
//!
//! # Generate a synthetic trace
//! tradeoff-sim generate sets/mixed.txt jobs/mixed.txt --max-bound 3 --seed 7
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradeoff_simulation_engine::{
    Controller, PolicyRegistry, PolicySpec, RunConfig, SimulationReport, Time,
    generator::{JobGenerator, read_job_set},
    results::write_results,
    trace::{read_trace, write_trace},
    types::Job,
};

/// Policies compared by `sweep`
const SWEEP_POLICIES: [&str; 4] = ["kjd1", "kjd2", "ujd1", "ujd2"];

#[derive(Parser)]
#[command(name = "tradeoff-sim")]
#[command(about = "Simulate online container autoscaling policies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation described by a config file
    Run {
        config: PathBuf,

        /// Also dump the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Run one policy on a named job set
    Bench {
        policy: String,
        job_set: String,
        startup_time: Time,

        /// Policy parameter (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        #[arg(long, default_value = "jobs")]
        jobs_dir: PathBuf,

        #[arg(long, default_value = "results")]
        results_dir: PathBuf,

        /// Abort after this many controller steps
        #[arg(long)]
        max_steps: Option<u64>,
    },

    /// Run KJD1, KJD2, UJD1 and UJD2 for epsilon 0.1 through 0.9
    Sweep {
        job_set: String,
        startup_time: Time,

        #[arg(long, default_value = "jobs")]
        jobs_dir: PathBuf,

        /// Write one results file per run here
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Dump every report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Generate a job trace from a job-set description
    Generate {
        job_set_spec: PathBuf,
        jobs_file: PathBuf,

        /// Attach lower/upper bounds up to this far from the true duration
        #[arg(long)]
        max_bound: Option<Time>,

        #[arg(long)]
        seed: Option<u64>,

        /// Prefix for generated job ids
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// List registered policies
    Policies,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradeoff_simulation_engine=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let registry = PolicyRegistry::with_defaults();

    match cli.command {
        Commands::Run { config, json } => run_config(&registry, &config, json.as_deref()),

        Commands::Bench {
            policy,
            job_set,
            startup_time,
            params,
            jobs_dir,
            results_dir,
            max_steps,
        } => {
            let mut config = RunConfig::new(
                jobs_dir.join(format!("{job_set}.txt")),
                results_dir.join(format!("{}_{job_set}.txt", policy.to_lowercase())),
                PolicySpec::new(policy, params),
                startup_time,
            );
            config.max_steps = max_steps;
            let report = run_and_write(&registry, &config)?;
            print_summary(&[report]);
            Ok(())
        }

        Commands::Sweep {
            job_set,
            startup_time,
            jobs_dir,
            results_dir,
            json,
        } => sweep(
            &registry,
            &jobs_dir.join(format!("{job_set}.txt")),
            &job_set,
            startup_time,
            results_dir.as_deref(),
            json.as_deref(),
        ),

        Commands::Generate {
            job_set_spec,
            jobs_file,
            max_bound,
            seed,
            prefix,
        } => {
            let batches = read_job_set(&job_set_spec)
                .with_context(|| format!("reading job set {}", job_set_spec.display()))?;

            let mut generator = JobGenerator::new(seed).with_prefix(prefix);
            if let Some(max_bound) = max_bound {
                generator = generator.with_max_bound(max_bound);
            }
            let jobs = generator.generate_all(&batches);

            if let Some(parent) = jobs_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            write_trace(&jobs_file, &jobs)
                .with_context(|| format!("writing trace {}", jobs_file.display()))?;
            info!(jobs = jobs.len(), path = %jobs_file.display(), "Trace generated");
            Ok(())
        }

        Commands::Policies => {
            for (name, params) in registry.entries() {
                println!("{name:<8} {params}");
            }
            Ok(())
        }
    }
}

fn run_config(registry: &PolicyRegistry, path: &Path, json: Option<&Path>) -> anyhow::Result<()> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    let report = run_and_write(registry, &config)?;

    if let Some(json) = json {
        fs::write(json, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report {}", json.display()))?;
    }
    print_summary(&[report]);
    Ok(())
}

fn run_and_write(registry: &PolicyRegistry, config: &RunConfig) -> anyhow::Result<SimulationReport> {
    let mut controller = Controller::from_config(config, registry)
        .with_context(|| format!("preparing run of {}", config.policy.name))?;
    let report = controller
        .run()
        .with_context(|| format!("simulating {}", config.policy.name))?;

    if let Some(parent) = config.results_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_results(&config.results_file, &report)
        .with_context(|| format!("writing results {}", config.results_file.display()))?;
    info!(path = %config.results_file.display(), "Results written");
    Ok(report)
}

fn sweep(
    registry: &PolicyRegistry,
    jobs_file: &Path,
    job_set: &str,
    startup_time: Time,
    results_dir: Option<&Path>,
    json: Option<&Path>,
) -> anyhow::Result<()> {
    let jobs: Vec<Job> = read_trace(jobs_file)
        .with_context(|| format!("reading trace {}", jobs_file.display()))?;

    let runs: Vec<(&str, String)> = SWEEP_POLICIES
        .iter()
        .flat_map(|policy| (1..=9).map(move |tenth| (*policy, format!("0.{tenth}"))))
        .collect();
    info!(runs = runs.len(), jobs = jobs.len(), "Starting sweep");

    // Runs share nothing but the trace, so each gets its own thread
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = runs
            .iter()
            .map(|(policy, epsilon)| {
                let jobs = jobs.clone();
                scope.spawn(move || -> anyhow::Result<SimulationReport> {
                    let policy_box = registry.build(policy, &[epsilon.clone()])?;
                    let mut report = Controller::new(startup_time, jobs)
                        .with_policy(policy_box)
                        .run()?;
                    report.policy_name = format!("{}(eps={epsilon})", report.policy_name);
                    Ok(report)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("sweep worker panicked"))?
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    if let Some(dir) = results_dir {
        fs::create_dir_all(dir)?;
        for ((policy, epsilon), report) in runs.iter().zip(&reports) {
            write_results(dir.join(format!("{policy}_{epsilon}_{job_set}.txt")), report)?;
        }
    }
    if let Some(json) = json {
        fs::write(json, serde_json::to_string_pretty(&reports)?)
            .with_context(|| format!("writing report {}", json.display()))?;
    }

    print_summary(&reports);
    Ok(())
}

fn print_summary(reports: &[SimulationReport]) {
    println!(
        "{:<16} {:>10} {:>11} {:>10} {:>10} {:>10} {:>8}",
        "Policy", "Cost", "Completed", "Max Queue", "Avg Queue", "P99 Queue", "Launched"
    );
    println!("{}", "-".repeat(81));

    for report in reports {
        println!(
            "{:<16} {:>10} {:>7}/{:<3} {:>10} {:>10.2} {:>10} {:>8}",
            report.policy_name,
            report.total_cost,
            report.completed_jobs,
            report.total_jobs,
            report.max_queue_time,
            report.average_queue_time,
            report.p99_queue_time,
            report.containers_launched,
        );
    }
}
