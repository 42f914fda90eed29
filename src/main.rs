use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plumetrace::config::{self, Inversion};
use plumetrace::{
    io, ComparisonEntry, GenerationRecord, InversionDriver, InversionResult, Policy, RunOptions,
};
use serde::Serialize;
use std::fs;
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_VERSION: &str = "1.0.0";

/// Every this many generations the CLI logs a progress line
const PROGRESS_EVERY: usize = 25;

#[derive(Parser, Debug)]
#[command(name = "plumetrace")]
#[command(version)]
#[command(about = "Emission source inversion with genetic optimizers over a Gaussian plume model")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML scenario file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Convergence history CSV; estimates and JSON are written next to it
    #[arg(short, long, global = true)]
    out: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one inversion
    Run {
        /// Override the policy of the [run] section
        #[arg(long)]
        policy: Option<Policy>,
        /// Generate JSON manifest and result bundle
        #[arg(long)]
        json: bool,
    },
    /// Run several policies on the same scenario and rank them
    Compare {
        /// Policies to compare (default: all)
        #[arg(long, value_delimiter = ',')]
        policies: Vec<Policy>,
        /// Generate JSON outputs
        #[arg(long)]
        json: bool,
    },
    /// Validate a scenario file
    Validate,
    /// Print version information
    Version,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    tool_version: String,
    timestamp_utc: String,
    platform: String,
    config_hash: String,
    config_snapshot: config::Root,
}

#[derive(Serialize)]
struct RunBundle<'a> {
    manifest: Manifest,
    options: &'a RunOptions,
    result: &'a InversionResult,
}

#[derive(Serialize)]
struct CompareBundle<'a> {
    manifest: Manifest,
    best_policy: Option<Policy>,
    ranking: &'a [ComparisonEntry],
    results: Vec<&'a InversionResult>,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn compute_hash(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn create_manifest(cfg: &config::Root, cfg_text: &str) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: VERSION.to_string(),
        timestamp_utc: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        platform: std::env::consts::OS.to_string(),
        config_hash: compute_hash(cfg_text),
        config_snapshot: cfg.clone(),
    }
}

fn load_config(path: &str) -> Result<(config::Root, String)> {
    let cfg_text = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let cfg: config::Root = toml::from_str(&cfg_text).with_context(|| format!("parsing {}", path))?;
    cfg.validate()?;
    Ok((cfg, cfg_text))
}

fn sibling_path(out_path: &str, suffix: &str) -> String {
    match out_path.strip_suffix(".csv") {
        Some(stem) => format!("{}{}", stem, suffix),
        None => format!("{}{}", out_path, suffix),
    }
}

fn driver_for(inv: &Inversion) -> InversionDriver {
    let driver = InversionDriver::new(inv.scenario.clone(), inv.observations.clone());
    match inv.truth {
        Some(truth) => driver.with_ground_truth(truth),
        None => driver,
    }
}

/// Log a line every `PROGRESS_EVERY` generations until the sender is dropped
fn spawn_progress_logger() -> (mpsc::Sender<GenerationRecord>, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<GenerationRecord>();
    let handle = thread::spawn(move || {
        for record in rx {
            if record.generation % PROGRESS_EVERY == 0 {
                info!(
                    policy = %record.policy,
                    generation = record.generation,
                    best = record.best_so_far,
                    diversity = record.diversity,
                    "progress"
                );
            }
        }
    });
    (tx, handle)
}

fn print_result(result: &InversionResult) {
    eprintln!("  Policy:       {}", result.policy);
    eprintln!("  Termination:  {} after {} generations", result.termination, result.generations);
    if let Some(s) = result.estimate() {
        eprintln!(
            "  Estimate:     x={:.2} m  y={:.2} m  h={:.2} m  Q={:.4} g/s",
            s.x, s.y, s.height, s.emission_rate
        );
    }
    eprintln!("  Fitness:      {:?}", result.best_fitness);
    let u = &result.uncertainty;
    eprintln!(
        "  95% CI:       x=[{:.1}, {:.1}]  y=[{:.1}, {:.1}]  h=[{:.1}, {:.1}]  Q=[{:.3}, {:.3}]  (n={})",
        u.x.lower, u.x.upper, u.y.lower, u.y.upper, u.height.lower, u.height.upper,
        u.emission_rate.lower, u.emission_rate.upper, u.sample_size
    );
    if let Some(v) = &result.validation {
        eprintln!(
            "  Validation:   position {:.2} m  height {:.2} m  emission {:.2} %",
            v.position_error, v.height_error, v.emission_error
        );
    }
    if let Some(hv) = result.hypervolume {
        eprintln!("  Hypervolume:  {:.4} ({} front members)", hv, result.best.members().len());
    }
    eprintln!(
        "  Cache:        {} evaluations, {} requests ({:.1} % hits)",
        result.cache.computations,
        result.cache.requests,
        result.cache.hit_rate() * 100.0
    );
}

// ============================================================================
// Commands
// ============================================================================

fn run_single(
    cfg: &config::Root,
    cfg_text: &str,
    out_path: &str,
    policy: Option<Policy>,
    json_output: bool,
) -> Result<()> {
    let options = cfg.run.to_options(policy)?;
    let inv = cfg.build()?;

    let (tx, logger) = spawn_progress_logger();
    let result = driver_for(&inv).with_progress(tx).run(&options);
    // The driver (and its sender) is gone once run returns
    if logger.join().is_err() {
        warn!("progress logger thread panicked");
    }
    let result = result?;

    io::write_history(out_path, &[&result])?;
    let estimates_path = sibling_path(out_path, "_estimates.csv");
    io::write_estimates(&estimates_path, &[&result])?;

    eprintln!("[plumetrace] inversion complete");
    print_result(&result);
    eprintln!("[plumetrace] history: {}", out_path);
    eprintln!("[plumetrace] estimates: {}", estimates_path);

    if json_output {
        let json_path = sibling_path(out_path, ".json");
        let bundle = RunBundle {
            manifest: create_manifest(cfg, cfg_text),
            options: &options,
            result: &result,
        };
        fs::write(&json_path, serde_json::to_string_pretty(&bundle)?)?;
        eprintln!("[plumetrace] JSON bundle: {}", json_path);
    }

    if result.validation.is_none() {
        warn!("no [truth] source configured, validation metrics skipped");
    }
    Ok(())
}

fn run_compare(
    cfg: &config::Root,
    cfg_text: &str,
    out_path: &str,
    policies: &[Policy],
    json_output: bool,
) -> Result<()> {
    let policies: Vec<Policy> = if policies.is_empty() {
        Policy::ALL.to_vec()
    } else {
        policies.to_vec()
    };
    let runs = policies
        .iter()
        .map(|p| cfg.run.to_options(Some(*p)))
        .collect::<Result<Vec<_>>>()?;

    let inv = cfg.build()?;
    let (tx, logger) = spawn_progress_logger();
    let summary = driver_for(&inv).with_progress(tx).compare(&runs);
    if logger.join().is_err() {
        warn!("progress logger thread panicked");
    }
    let summary = summary?;

    let results: Vec<&InversionResult> = summary.runs.iter().map(|r| &r.result).collect();
    io::write_history(out_path, &results)?;
    let estimates_path = sibling_path(out_path, "_estimates.csv");
    io::write_estimates(&estimates_path, &results)?;

    eprintln!("[plumetrace] comparison complete ({} policies)", summary.entries.len());
    eprintln!(
        "  {:>16} {:>12} {:>10} {:>10} {:>9} {:>10}",
        "policy", "fitness", "pos err", "Q err %", "time s", "score"
    );
    eprintln!("  {}", "-".repeat(72));
    let fmt_opt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
    for e in &summary.entries {
        eprintln!(
            "  {:>16} {:>12.4e} {:>10} {:>10} {:>9.2} {:>10.3}",
            e.policy.name(),
            e.best_fitness,
            fmt_opt(e.position_error),
            fmt_opt(e.emission_error),
            e.elapsed_seconds,
            e.score
        );
    }
    if let Some(best) = summary.best_policy() {
        eprintln!("[plumetrace] best policy: {}", best);
        if let Some(result) = summary.result(best) {
            print_result(result);
        }
    }

    if json_output {
        let json_path = sibling_path(out_path, ".json");
        let bundle = CompareBundle {
            manifest: create_manifest(cfg, cfg_text),
            best_policy: summary.best_policy(),
            ranking: &summary.entries,
            results,
        };
        fs::write(&json_path, serde_json::to_string_pretty(&bundle)?)?;
        eprintln!("[plumetrace] JSON comparison: {}", json_path);
    }
    Ok(())
}

fn validate_config(cfg_path: &str) -> Result<()> {
    let (cfg, _) = load_config(cfg_path)?;
    let options = cfg.run.to_options(None)?;
    let inv = cfg.build()?;
    let scenario = &inv.scenario;

    eprintln!("[plumetrace] config valid: {}", cfg_path);
    if !cfg.scenario.name.is_empty() {
        eprintln!("  scenario: {}", cfg.scenario.name);
    }
    let met = scenario.meteorology();
    eprintln!(
        "  meteorology: wind {:.1} m/s toward {:.0}°, stability {}",
        met.wind_speed,
        met.wind_direction,
        met.stability_class()
    );
    eprintln!(
        "  sensors: {} receptors, {} usable readings",
        scenario.receptors().len(),
        inv.observations.usable_count()
    );
    let b = scenario.bounds();
    eprintln!(
        "  bounds: x=[{}, {}] y=[{}, {}] h=[{}, {}] Q=[{}, {}]",
        b.x.lower, b.x.upper, b.y.lower, b.y.upper, b.height.lower, b.height.upper,
        b.emission_rate.lower, b.emission_rate.upper
    );
    eprintln!(
        "  run: policy={} population={} generations={} seed={}",
        options.policy, options.population_size, options.max_generations, options.seed
    );
    Ok(())
}

fn print_version() {
    eprintln!("plumetrace - Gaussian plume source inversion");
    eprintln!();
    eprintln!("  Version:         {}", VERSION);
    eprintln!("  Schema Version:  {}", SCHEMA_VERSION);
    eprintln!("  Platform:        {}", std::env::consts::OS);
    eprintln!("  Architecture:    {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("Policies:");
    eprintln!("  - standard:        fixed mutation rate, elitism, tournament selection");
    eprintln!("  - adaptive:        mutation pressure follows diversity and stagnation");
    eprintln!("  - multi_objective: NSGA-II, full Pareto front");
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Validate => {
            let cfg_path = args.config.context("--config required for validate")?;
            validate_config(&cfg_path)
        }
        Commands::Run { policy, json } => {
            let cfg_path = args.config.context("--config required")?;
            let out_path = args.out.unwrap_or_else(|| "results/history.csv".to_string());
            let (cfg, cfg_text) = load_config(&cfg_path)?;
            info!(config = %cfg_path, scenario = %cfg.scenario.name, "loaded scenario");
            run_single(&cfg, &cfg_text, &out_path, policy, json)
        }
        Commands::Compare { policies, json } => {
            let cfg_path = args.config.context("--config required")?;
            let out_path = args.out.unwrap_or_else(|| "results/comparison.csv".to_string());
            let (cfg, cfg_text) = load_config(&cfg_path)?;
            info!(config = %cfg_path, scenario = %cfg.scenario.name, "loaded scenario");
            run_compare(&cfg, &cfg_text, &out_path, &policies, json)
        }
    }
}
