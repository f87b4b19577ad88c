use std::path::{Path, PathBuf};

use clap::Parser;
use redmars::battle::{BattleConfig, MatchSummary, TournamentStanding, run_match, tournament};
use redmars::compiler::{Warrior, compile};
use redmars::placement::spaced_offsets;
use redmars::run_battle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "redmars", about = "Redcode battle simulator (ICWS-94 MARS)")]
struct Cli {
    /// Redcode source files, one warrior each.
    #[arg(required = true)]
    warriors: Vec<PathBuf>,

    /// JSON battle configuration; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of rounds per match.
    #[arg(long, default_value_t = 1)]
    rounds: usize,

    /// Random seed for warrior placement.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long)]
    core_size: Option<usize>,

    #[arg(long)]
    max_cycles: Option<u64>,

    /// Live process cap per warrior.
    #[arg(long)]
    max_processes: Option<usize>,

    #[arg(long)]
    max_length: Option<usize>,

    #[arg(long)]
    min_separation: Option<usize>,

    #[arg(long)]
    read_limit: Option<usize>,

    #[arg(long)]
    write_limit: Option<usize>,

    /// Play every pair of warriors instead of one free-for-all match.
    #[arg(long)]
    tournament: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// Run in benchmark mode: print throughput stats instead of results.
    #[arg(long)]
    benchmark: bool,

    /// Print the canonical source of each compiled warrior and exit.
    #[arg(long)]
    dump: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(&cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn dispatch(cli: &Cli) -> Result<(), String> {
    let config = build_config(cli)?;
    let warriors = cli
        .warriors
        .iter()
        .map(|path| load_warrior(path))
        .collect::<Result<Vec<_>, _>>()?;

    if cli.dump {
        for w in &warriors {
            println!("{}", w.to_source());
        }
        return Ok(());
    }

    if cli.benchmark {
        return run_benchmark(&warriors, &config, cli.rounds);
    }

    if cli.tournament {
        let standings = tournament(&warriors, &config, cli.rounds, cli.seed).map_err(|e| e.to_string())?;
        if cli.json {
            print_json(&standings)?;
        } else {
            print_standings(&standings);
        }
    } else {
        let summary = run_match(&warriors, &config, cli.rounds, cli.seed).map_err(|e| e.to_string())?;
        if cli.json {
            print_json(&summary)?;
        } else {
            print_summary(&warriors, &summary);
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<BattleConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => BattleConfig::default(),
    };
    if let Some(v) = cli.core_size {
        config.core_size = v;
    }
    if let Some(v) = cli.max_cycles {
        config.max_cycles = v;
    }
    if let Some(v) = cli.max_processes {
        config.max_processes = v;
    }
    if let Some(v) = cli.max_length {
        config.max_length = v;
    }
    if let Some(v) = cli.min_separation {
        config.min_separation = v;
    }
    if cli.read_limit.is_some() {
        config.read_limit = cli.read_limit;
    }
    if cli.write_limit.is_some() {
        config.write_limit = cli.write_limit;
    }
    Ok(config)
}

fn load_warrior(path: &Path) -> Result<Warrior, String> {
    let source = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    compile(&source).map_err(|e| format!("{}: {e}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn print_summary(warriors: &[Warrior], summary: &MatchSummary) {
    println!("{:<24} {:>6} {:>6} {:>6}", "warrior", "wins", "losses", "ties");
    for (w, r) in warriors.iter().zip(&summary.records) {
        println!("{:<24} {:>6} {:>6} {:>6}", w.name, r.wins, r.losses, r.ties);
    }
    println!("rounds: {}, mean cycles: {:.1}", summary.rounds, summary.mean_cycles);
}

fn print_standings(standings: &[TournamentStanding]) {
    println!("{:<24} {:>6} {:>6} {:>6}", "warrior", "wins", "losses", "ties");
    for s in standings {
        println!(
            "{:<24} {:>6} {:>6} {:>6}",
            s.name, s.record.wins, s.record.losses, s.record.ties
        );
    }
}

fn run_benchmark(warriors: &[Warrior], config: &BattleConfig, rounds: usize) -> Result<(), String> {
    let offsets = spaced_offsets(warriors.len(), config.core_size);

    let start = std::time::Instant::now();
    let mut total_cycles = 0u64;
    let mut total_instructions = 0u64;
    for _ in 0..rounds {
        let result = run_battle(warriors, config, &offsets).map_err(|e| e.to_string())?;
        total_cycles += result.cycles_elapsed;
        total_instructions += result
            .metrics
            .iter()
            .map(|m| m.instructions_executed)
            .sum::<u64>();
    }
    let elapsed = start.elapsed();

    let battles_per_sec = rounds as f64 / elapsed.as_secs_f64();
    let instructions_per_sec = total_instructions as f64 / elapsed.as_secs_f64();

    eprintln!("Benchmark results:");
    eprintln!("  Battles:           {rounds}");
    eprintln!("  Warriors:          {}", warriors.len());
    eprintln!("  Total cycles:      {total_cycles}");
    eprintln!("  Elapsed:           {elapsed:.2?}");
    eprintln!("  Battles/sec:       {battles_per_sec:.1}");
    eprintln!("  Instructions/sec:  {instructions_per_sec:.0}");
    Ok(())
}
