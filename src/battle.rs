use rand::SeedableRng;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::compiler::Warrior;
use crate::memory::{Core, WarriorId};
use crate::metrics::{CoreSnapshot, MeanStats, WarriorStats};
use crate::placement::{circular_distance, random_offsets};
use crate::scheduler::Scheduler;

/// Parameters of a single battle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    /// Number of cells in the core.
    pub core_size: usize,
    /// Cycle budget; reaching it ends the battle.
    pub max_cycles: u64,
    /// Live process cap per warrior.
    pub max_processes: usize,
    /// Longest warrior accepted, in instructions.
    pub max_length: usize,
    /// Minimum circular distance between any two load offsets.
    pub min_separation: usize,
    /// Read distance limit. `None` means the whole core.
    pub read_limit: Option<usize>,
    /// Write distance limit. `None` means the whole core.
    pub write_limit: Option<usize>,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            core_size: 8000,
            max_cycles: 80_000,
            max_processes: 8000,
            max_length: 100,
            min_separation: 100,
            read_limit: None,
            write_limit: None,
        }
    }
}

/// A battle that cannot start. Nothing has executed when one is returned.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("core size must be positive")]
    ZeroCoreSize,
    #[error("process limit must be positive")]
    ZeroMaxProcesses,
    #[error("no warriors to battle")]
    NoWarriors,
    #[error("warrior {index} has no instructions")]
    EmptyWarrior { index: usize },
    #[error("warrior {index} has {len} instructions, limit is {limit}")]
    WarriorTooLong {
        index: usize,
        len: usize,
        limit: usize,
    },
    #[error("warrior {index} starts at {start}, past its last instruction")]
    StartOutOfRange { index: usize, start: usize },
    #[error("core of {core_size} cells cannot hold {warriors} warriors {min_separation} cells apart")]
    CoreTooSmall {
        core_size: usize,
        warriors: usize,
        min_separation: usize,
    },
    #[error("expected {expected} load offsets, got {got}")]
    OffsetCountMismatch { expected: usize, got: usize },
    #[error("warriors {first} and {second} load {distance} cells apart, minimum is {min_separation}")]
    OffsetsTooClose {
        first: usize,
        second: usize,
        distance: usize,
        min_separation: usize,
    },
    #[error("{which} limit {value} must be between 1 and the core size {core_size}")]
    InvalidLimit {
        which: &'static str,
        value: usize,
        core_size: usize,
    },
}

impl BattleConfig {
    /// Check the configuration against a set of warriors, independent of
    /// where they will be loaded.
    pub fn validate(&self, warriors: &[Warrior]) -> Result<(), ConfigError> {
        if self.core_size == 0 {
            return Err(ConfigError::ZeroCoreSize);
        }
        if self.max_processes == 0 {
            return Err(ConfigError::ZeroMaxProcesses);
        }
        for (which, limit) in [("read", self.read_limit), ("write", self.write_limit)] {
            if let Some(value) = limit {
                if value == 0 || value > self.core_size {
                    return Err(ConfigError::InvalidLimit {
                        which,
                        value,
                        core_size: self.core_size,
                    });
                }
            }
        }
        if warriors.is_empty() {
            return Err(ConfigError::NoWarriors);
        }
        let too_small = warriors
            .len()
            .checked_mul(self.min_separation)
            .is_none_or(|needed| needed > self.core_size);
        if too_small {
            return Err(ConfigError::CoreTooSmall {
                core_size: self.core_size,
                warriors: warriors.len(),
                min_separation: self.min_separation,
            });
        }
        let limit = self.max_length.min(self.core_size);
        for (index, w) in warriors.iter().enumerate() {
            if w.is_empty() {
                return Err(ConfigError::EmptyWarrior { index });
            }
            if w.len() > limit {
                return Err(ConfigError::WarriorTooLong {
                    index,
                    len: w.len(),
                    limit,
                });
            }
            if w.start >= w.len() {
                return Err(ConfigError::StartOutOfRange {
                    index,
                    start: w.start,
                });
            }
        }
        Ok(())
    }

    /// Check a set of load offsets for count and pairwise separation.
    pub fn validate_offsets(&self, warriors: usize, offsets: &[usize]) -> Result<(), ConfigError> {
        if offsets.len() != warriors {
            return Err(ConfigError::OffsetCountMismatch {
                expected: warriors,
                got: offsets.len(),
            });
        }
        for (first, &a) in offsets.iter().enumerate() {
            for (second, &b) in offsets.iter().enumerate().skip(first + 1) {
                let distance = circular_distance(a % self.core_size, b % self.core_size, self.core_size);
                if distance < self.min_separation {
                    return Err(ConfigError::OffsetsTooClose {
                        first,
                        second,
                        distance,
                        min_separation: self.min_separation,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    Tie,
}

/// Frozen snapshot of a finished battle. Vectors are indexed by warrior.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BattleResult {
    pub outcomes: Vec<Outcome>,
    pub cycles_elapsed: u64,
    pub final_process_counts: Vec<usize>,
    /// Cycle in which each warrior lost its last process.
    pub eliminated_at: Vec<Option<u64>>,
    pub metrics: Vec<WarriorStats>,
    /// Final core measurements. Left out of match rounds, which never read them.
    pub core: Option<CoreSnapshot>,
}

/// One battle in progress: a fresh core, every warrior loaded into it, and
/// the scheduler that drives them to termination.
///
/// Owns its core and every process queue. Stepping is single-threaded and
/// deterministic.
#[derive(Clone, Debug)]
pub struct Battle {
    core: Core,
    scheduler: Scheduler,
    max_cycles: u64,
}

impl Battle {
    /// Validate, load every warrior at its offset and seed one process each.
    pub fn new(warriors: &[Warrior], config: &BattleConfig, offsets: &[usize]) -> Result<Self, ConfigError> {
        config.validate(warriors)?;
        config.validate_offsets(warriors.len(), offsets)?;

        let size = config.core_size;
        let mut core = Core::new(size).with_limits(
            config.read_limit.unwrap_or(size),
            config.write_limit.unwrap_or(size),
        );
        let mut entries = Vec::with_capacity(warriors.len());
        for (id, (w, &offset)) in warriors.iter().zip(offsets).enumerate() {
            let offset = offset % size;
            core.load(offset, &w.instructions, id);
            entries.push((offset + w.start) % size);
            debug!(warrior = id, name = %w.name, offset, len = w.len(), "loaded warrior");
        }

        Ok(Self {
            core,
            scheduler: Scheduler::new(&entries, config.max_processes),
            max_cycles: config.max_cycles,
        })
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cycle(&self) -> u64 {
        self.scheduler.cycle()
    }

    /// A lone warrior fights until it dies; otherwise the battle ends once
    /// fewer than two warriors remain. The cycle budget always ends it.
    pub fn is_finished(&self) -> bool {
        if self.scheduler.cycle() >= self.max_cycles {
            return true;
        }
        let alive = self.scheduler.alive_count();
        if self.scheduler.warrior_count() == 1 {
            alive == 0
        } else {
            alive < 2
        }
    }

    /// Run one cycle. Does nothing once the battle is finished.
    pub fn step_cycle(&mut self) {
        if !self.is_finished() {
            self.scheduler.run_cycle(&mut self.core);
        }
    }

    /// Step until finished and report.
    pub fn run(mut self) -> BattleResult {
        while !self.is_finished() {
            self.scheduler.run_cycle(&mut self.core);
        }
        self.finish()
    }

    /// Freeze the current state into a result, consuming the battle.
    pub fn finish(self) -> BattleResult {
        self.conclude(true)
    }

    fn conclude(self, with_core: bool) -> BattleResult {
        let n = self.scheduler.warrior_count();
        let eliminated_at: Vec<Option<u64>> = (0..n).map(|w| self.scheduler.eliminated_at(w)).collect();
        let outcomes = score(&eliminated_at);

        let metrics = (0..n)
            .map(|w| WarriorStats {
                memory_writes: self.core.writes_by(w),
                owned_cells: self.core.owned_cells(w),
                memory_coverage: self.core.coverage(w),
                ..self.scheduler.stats(w).clone()
            })
            .collect();

        let result = BattleResult {
            outcomes,
            cycles_elapsed: self.scheduler.cycle(),
            final_process_counts: (0..n).map(|w| self.scheduler.process_count(w)).collect(),
            eliminated_at,
            metrics,
            core: with_core.then(|| CoreSnapshot::of(&self.core)),
        };
        debug!(
            cycles = result.cycles_elapsed,
            outcomes = ?result.outcomes,
            "battle finished"
        );
        result
    }
}

/// Decide outcomes from elimination cycles (`None` = still alive).
///
/// Two or more survivors tie and the dead lose. A sole survivor wins. With
/// no survivors, a lone warrior loses; in a multi-warrior battle, those that
/// fell in the final elimination cycle tie and earlier casualties lose.
fn score(eliminated_at: &[Option<u64>]) -> Vec<Outcome> {
    let alive = eliminated_at.iter().filter(|e| e.is_none()).count();
    match alive {
        0 if eliminated_at.len() == 1 => vec![Outcome::Loss],
        0 => {
            let last = eliminated_at.iter().flatten().max().copied();
            eliminated_at
                .iter()
                .map(|&e| if e == last { Outcome::Tie } else { Outcome::Loss })
                .collect()
        }
        1 => eliminated_at
            .iter()
            .map(|e| if e.is_none() { Outcome::Win } else { Outcome::Loss })
            .collect(),
        _ => eliminated_at
            .iter()
            .map(|e| if e.is_none() { Outcome::Tie } else { Outcome::Loss })
            .collect(),
    }
}

/// Run one battle with explicit load offsets.
pub fn run_battle(
    warriors: &[Warrior],
    config: &BattleConfig,
    offsets: &[usize],
) -> Result<BattleResult, ConfigError> {
    Ok(Battle::new(warriors, config, offsets)?.run())
}

/// Win/loss/tie tally for one warrior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
}

impl Record {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Tie => self.ties += 1,
        }
    }

    fn merge(&mut self, other: &Record) {
        self.wins += other.wins;
        self.losses += other.losses;
        self.ties += other.ties;
    }
}

/// Aggregate of a multi-round match.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchSummary {
    pub rounds: usize,
    /// Indexed by warrior.
    pub records: Vec<Record>,
    pub mean_cycles: f64,
    /// Per-warrior behavioural metrics averaged over the rounds.
    pub mean_metrics: Vec<MeanStats>,
}

/// Seed for one round of a match.
fn round_seed(seed: u64, round: usize) -> u64 {
    seed ^ (round as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Run `rounds` battles with seeded random placement and tally the outcomes.
///
/// Rounds run in parallel over rayon. Each derives its own seed from `seed`,
/// so the summary does not depend on thread count.
pub fn run_match(
    warriors: &[Warrior],
    config: &BattleConfig,
    rounds: usize,
    seed: u64,
) -> Result<MatchSummary, ConfigError> {
    config.validate(warriors)?;
    let lengths: Vec<usize> = warriors.iter().map(Warrior::len).collect();

    let results: Vec<BattleResult> = (0..rounds)
        .into_par_iter()
        .map(|round| -> Result<BattleResult, ConfigError> {
            let mut rng = SmallRng::seed_from_u64(round_seed(seed, round));
            let offsets = random_offsets(&mut rng, &lengths, config);
            let mut battle = Battle::new(warriors, config, &offsets)?;
            while !battle.is_finished() {
                battle.step_cycle();
            }
            Ok(battle.conclude(false))
        })
        .collect::<Result<_, _>>()?;

    let mut records = vec![Record::default(); warriors.len()];
    let mut total_cycles = 0u64;
    for result in &results {
        for (record, &outcome) in records.iter_mut().zip(&result.outcomes) {
            record.add(outcome);
        }
        total_cycles += result.cycles_elapsed;
    }
    let mean_cycles = if rounds == 0 {
        0.0
    } else {
        total_cycles as f64 / rounds as f64
    };
    let mean_metrics = (0..warriors.len())
        .map(|w| MeanStats::of(results.iter().map(|r| &r.metrics[w])))
        .collect();
    debug!(rounds, mean_cycles, "match finished");

    Ok(MatchSummary {
        rounds,
        records,
        mean_cycles,
        mean_metrics,
    })
}

/// Standing of one warrior after a round-robin tournament.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TournamentStanding {
    pub warrior: WarriorId,
    pub name: String,
    pub record: Record,
}

/// Every pair of warriors plays a `rounds`-round match.
///
/// Standings are returned in warrior order; ranking is left to the caller.
pub fn tournament(
    warriors: &[Warrior],
    config: &BattleConfig,
    rounds: usize,
    seed: u64,
) -> Result<Vec<TournamentStanding>, ConfigError> {
    config.validate(warriors)?;
    let pairs: Vec<(usize, usize)> = (0..warriors.len())
        .flat_map(|i| ((i + 1)..warriors.len()).map(move |j| (i, j)))
        .collect();

    let summaries: Vec<((usize, usize), MatchSummary)> = pairs
        .par_iter()
        .enumerate()
        .map(|(k, &(i, j))| {
            let pair = [warriors[i].clone(), warriors[j].clone()];
            run_match(&pair, config, rounds, round_seed(seed, k)).map(|s| ((i, j), s))
        })
        .collect::<Result<_, _>>()?;

    let mut standings: Vec<TournamentStanding> = warriors
        .iter()
        .enumerate()
        .map(|(warrior, w)| TournamentStanding {
            warrior,
            name: w.name.clone(),
            record: Record::default(),
        })
        .collect();
    for ((i, j), summary) in &summaries {
        standings[*i].record.merge(&summary.records[0]);
        standings[*j].record.merge(&summary.records[1]);
    }
    Ok(standings)
}
