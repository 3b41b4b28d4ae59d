//! cityline-bench: CLI tool for strategy experimentation and diagnostics.
//!
//! Loads a city set from JSON (or generates one), runs a connection
//! strategy over it and prints diagnostics. Useful for:
//!
//! - Comparing strategies (`greedy` vs `exact` vs `cluster`)
//! - Tuning the cluster threshold and topology
//! - Finding the city count where `exact` stops being interactive
//! - Exercising the background supervisor end to end (`--supervised`)
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin cityline-bench -- [OPTIONS] [CITIES_PATH]
//! ```
//!
//! The city file is a JSON array of `{"name": "...", "position": {"x": .., "y": ..}}`.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use cityline_core::{
    CancelToken, ChangeNotifier, City, CityRegistry, Cluster, ConnectionMode, Exact, Greedy,
    NewCity, RunDiagnostics, Status, Strategy, Supervisor, SupervisorConfig, SystemClock,
    Topology, connect_with_diagnostics,
};
use tracing_subscriber::EnvFilter;

/// Strategy experimentation and diagnostics for cityline.
///
/// Runs a connection strategy over a city set with configurable
/// parameters and prints timing and shape diagnostics.
#[derive(Parser)]
#[command(name = "cityline-bench", version)]
struct Cli {
    /// Path to a JSON array of cities.
    #[arg(required_unless_present = "generate")]
    cities_path: Option<PathBuf>,

    /// Generate N cities on a spiral instead of reading a file.
    #[arg(long, conflicts_with = "cities_path")]
    generate: Option<usize>,

    /// Connection strategy.
    #[arg(long, value_enum, default_value_t = Kind::Greedy)]
    strategy: Kind,

    /// Cluster seed radius.
    #[arg(long, default_value_t = Cluster::DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Link shape inside a cluster.
    #[arg(long, value_enum, default_value_t = Shape::Chain)]
    topology: Shape,

    /// Largest city set the exact strategy will attempt.
    #[arg(long, default_value_t = Exact::DEFAULT_MAX_CITIES)]
    max_cities: usize,

    /// Name of the city the greedy chain starts from.
    #[arg(long)]
    start: Option<String>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full strategy as a JSON string.
    ///
    /// When provided, all other strategy flags are ignored. The JSON must
    /// be a valid `Strategy` serialization, e.g. `{"kind":"cluster","threshold":40}`.
    #[arg(long)]
    config_json: Option<String>,

    /// Run through the background supervisor instead of calling the
    /// strategy directly.
    #[arg(long)]
    supervised: bool,
}

/// Strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    /// Nearest-neighbour chain.
    Greedy,
    /// Brute-force shortest open path.
    Exact,
    /// Proximity clusters.
    Cluster,
}

/// Cluster topology selection.
#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    /// Nearest-neighbour chain inside each cluster.
    Chain,
    /// Every member points at its cluster seed.
    Star,
}

/// Build a [`Strategy`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual strategy flags are ignored. Otherwise, a strategy is
/// assembled from the individual flags. `--start` is resolved against the
/// loaded cities.
fn strategy_from_cli(cli: &Cli, cities: &[City]) -> Result<Strategy, String> {
    let strategy = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        match cli.strategy {
            Kind::Greedy => {
                let start = match cli.start {
                    Some(ref name) => Some(
                        cities
                            .iter()
                            .find(|c| &c.name == name)
                            .map(|c| c.id)
                            .ok_or_else(|| format!("No city named {name:?}"))?,
                    ),
                    None => None,
                };
                Strategy::Greedy(Greedy { start })
            }
            Kind::Exact => Strategy::Exact(Exact {
                max_cities: cli.max_cities,
            }),
            Kind::Cluster => Strategy::Cluster(Cluster {
                threshold: cli.threshold,
                topology: match cli.topology {
                    Shape::Chain => Topology::Chain,
                    Shape::Star => Topology::Star,
                },
            }),
        }
    };

    strategy
        .validate()
        .map_err(|e| format!("Invalid strategy: {e}"))?;
    Ok(strategy)
}

/// Load cities from the positional path or generate them.
fn cities_from_cli(cli: &Cli) -> Result<Vec<NewCity>, String> {
    if let Some(count) = cli.generate {
        return Ok(spiral(count));
    }
    let Some(ref path) = cli.cities_path else {
        return Err("Either CITIES_PATH or --generate is required".to_owned());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

/// `count` cities on a golden-angle spiral around (400, 300).
#[allow(clippy::cast_precision_loss)]
fn spiral(count: usize) -> Vec<NewCity> {
    const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;
    const SPACING: f64 = 12.0;

    (0..count)
        .map(|i| {
            let t = i as f64;
            let radius = SPACING * t.sqrt();
            let theta = t * GOLDEN_ANGLE;
            NewCity::new(
                format!("City {i}"),
                radius.mul_add(theta.cos(), 400.0),
                radius.mul_add(theta.sin(), 300.0),
            )
        })
        .collect()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let new_cities = match cities_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(CityRegistry::new());
    let supervisor = if cli.supervised {
        match Supervisor::new(
            Arc::clone(&registry),
            Arc::new(ChangeNotifier::new()),
            SupervisorConfig {
                mode: ConnectionMode::Manual,
                ..SupervisorConfig::default()
            },
        ) {
            Ok(s) => Some(s),
            Err(e) => {
                eprintln!("Error creating supervisor: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    // Cities go in before the strategy is chosen so `--start` can resolve
    // against their ids. The supervisor stays manual until then.
    match supervisor {
        Some(ref s) => {
            if let Err(e) = s.add_cities(new_cities) {
                eprintln!("Error adding cities: {e}");
                return ExitCode::FAILURE;
            }
        }
        None => {
            registry.add_cities(new_cities);
        }
    }
    let cities = registry.cities();

    let strategy = match strategy_from_cli(&cli, &cities) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("Cities: {}", cities.len());
    eprintln!("Strategy: {strategy:?}");
    eprintln!("Mode: {}", if cli.supervised { "supervised" } else { "direct" });
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let outcome = match supervisor {
            Some(ref s) => run_supervised(s, &strategy, run == 0),
            None => run_direct(&cities, &strategy),
        };

        match outcome {
            Ok(diagnostics) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }
                all_diagnostics.push(diagnostics);
            }
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Run the strategy on this thread.
fn run_direct(cities: &[City], strategy: &Strategy) -> Result<RunDiagnostics, String> {
    connect_with_diagnostics(strategy, cities, &CancelToken::new(), &SystemClock)
        .map(|(_, diagnostics)| diagnostics)
        .map_err(|e| format!("Strategy error: {e}"))
}

/// Dispatch through the supervisor and wait for it to settle.
///
/// The first run switches the supervisor to the strategy; later runs
/// trigger a recompute over the same cities.
fn run_supervised(
    supervisor: &Supervisor,
    strategy: &Strategy,
    first: bool,
) -> Result<RunDiagnostics, String> {
    let dispatched = if first {
        supervisor.set_strategy(strategy.clone())
    } else {
        supervisor.recompute()
    };
    dispatched.map_err(|e| format!("Supervisor error: {e}"))?;
    supervisor.wait_idle();

    match supervisor.status() {
        Status::Ready { generation, .. } => supervisor
            .last_run()
            .filter(|d| d.generation == Some(generation))
            .ok_or_else(|| "Fewer than two cities; nothing to measure".to_owned()),
        Status::TooManyCities { count, limit, .. } => Err(format!(
            "Strategy error: {count} cities exceed the limit of {limit}"
        )),
        other => Err(format!("Supervisor did not settle: {other:?}")),
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[RunDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| cityline_core::diagnostics::duration_ms(d.duration))
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    let lengths: Vec<f64> = all_diagnostics.iter().map(|d| d.total_length).collect();
    let shortest = lengths.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let longest = lengths.iter().copied().reduce(f64::max).unwrap_or(0.0);
    if (longest - shortest).abs() > f64::EPSILON {
        println!("Total length varied: {shortest:.3} .. {longest:.3}");
    } else {
        println!("Total length: {shortest:.3}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_cluster_flags() {
        let cli = Cli::try_parse_from([
            "cityline-bench",
            "--generate",
            "5",
            "--strategy",
            "cluster",
            "--threshold",
            "40",
            "--topology",
            "star",
        ])
        .unwrap();
        let strategy = strategy_from_cli(&cli, &[]).unwrap();
        assert_eq!(
            strategy,
            Strategy::Cluster(Cluster {
                threshold: 40.0,
                topology: Topology::Star,
            })
        );
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::try_parse_from([
            "cityline-bench",
            "--generate",
            "3",
            "--strategy",
            "cluster",
            "--config-json",
            r#"{"kind":"exact","max_cities":7}"#,
        ])
        .unwrap();
        let strategy = strategy_from_cli(&cli, &[]).unwrap();
        assert_eq!(strategy, Strategy::Exact(Exact { max_cities: 7 }));
    }

    #[test]
    fn unknown_start_city_is_an_error() {
        let cli = Cli::try_parse_from(["cityline-bench", "--generate", "3", "--start", "Nowhere"])
            .unwrap();
        let registry = CityRegistry::new();
        registry.add_cities(spiral(3));
        assert!(strategy_from_cli(&cli, &registry.cities()).is_err());
    }

    #[test]
    fn start_resolves_by_name() {
        let cli = Cli::try_parse_from(["cityline-bench", "--generate", "3", "--start", "City 2"])
            .unwrap();
        let registry = CityRegistry::new();
        let ids = registry.add_cities(spiral(3));
        let strategy = strategy_from_cli(&cli, &registry.cities()).unwrap();
        assert_eq!(strategy, Strategy::Greedy(Greedy::starting_at(ids[2])));
    }

    #[test]
    fn path_and_generate_conflict() {
        assert!(Cli::try_parse_from(["cityline-bench", "cities.json", "--generate", "3"]).is_err());
    }

    #[test]
    fn spiral_produces_distinct_positions() {
        let cities = spiral(50);
        assert_eq!(cities.len(), 50);
        for (i, a) in cities.iter().enumerate() {
            for b in &cities[i + 1..] {
                assert!(a.position.distance(b.position) > 1.0);
            }
        }
    }

    #[test]
    fn supervised_run_reports_generation() {
        let registry = Arc::new(CityRegistry::new());
        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            Arc::new(ChangeNotifier::new()),
            SupervisorConfig {
                mode: ConnectionMode::Manual,
                ..SupervisorConfig::default()
            },
        )
        .unwrap();
        supervisor.add_cities(spiral(6)).unwrap();

        let first = run_supervised(&supervisor, &Strategy::default(), true).unwrap();
        let second = run_supervised(&supervisor, &Strategy::default(), false).unwrap();

        assert_eq!(first.edge_count, 5);
        assert!(second.generation > first.generation);
        assert!((first.total_length - second.total_length).abs() < 1e-9);
    }
}
