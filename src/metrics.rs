use serde::Serialize;

use crate::memory::Core;

/// Behavioural counters for one warrior over a single battle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WarriorStats {
    pub instructions_executed: u64,
    /// Successful forks; SPLs dropped at the process cap are not counted.
    pub processes_spawned: u64,
    pub peak_processes: usize,
    /// Core writes made while executing, including pointer side effects.
    pub memory_writes: u64,
    /// Cells whose last writer (or loader) was this warrior when the battle ended.
    pub owned_cells: usize,
    /// Fraction of the core this warrior executed or wrote at least once.
    pub memory_coverage: f64,
}

/// Per-warrior [`WarriorStats`] averaged over the rounds of a match.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MeanStats {
    pub instructions_executed: f64,
    pub processes_spawned: f64,
    pub peak_processes: f64,
    pub memory_writes: f64,
    pub owned_cells: f64,
    pub memory_coverage: f64,
}

impl MeanStats {
    /// Average a set of rounds. No rounds gives all zeros.
    pub fn of<'a>(rounds: impl IntoIterator<Item = &'a WarriorStats>) -> Self {
        let mut sum = Self::default();
        let mut n = 0usize;
        for s in rounds {
            sum.instructions_executed += s.instructions_executed as f64;
            sum.processes_spawned += s.processes_spawned as f64;
            sum.peak_processes += s.peak_processes as f64;
            sum.memory_writes += s.memory_writes as f64;
            sum.owned_cells += s.owned_cells as f64;
            sum.memory_coverage += s.memory_coverage;
            n += 1;
        }
        if n == 0 {
            return sum;
        }
        let n = n as f64;
        Self {
            instructions_executed: sum.instructions_executed / n,
            processes_spawned: sum.processes_spawned / n,
            peak_processes: sum.peak_processes / n,
            memory_writes: sum.memory_writes / n,
            owned_cells: sum.owned_cells / n,
            memory_coverage: sum.memory_coverage / n,
        }
    }
}

/// Whole-core measurements taken when a battle ends.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoreSnapshot {
    /// See [`core_entropy`].
    pub entropy: f64,
    /// Cells holding each opcode, indexed like
    /// [`Opcode::ALL`](crate::instruction::Opcode::ALL).
    pub opcode_histogram: [usize; 16],
}

impl CoreSnapshot {
    pub fn of(core: &Core) -> Self {
        Self {
            entropy: core_entropy(core),
            opcode_histogram: opcode_histogram(core),
        }
    }
}

/// Brotli (quality 2) compressed size over raw size.
///
/// Near 0 for long runs of identical bytes, around 1 for noise, and a little
/// above 1 when the input is too small or too random to pay for the header.
/// Empty input scores 0.
pub fn high_order_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut compressed = Vec::new();
    let params = brotli::enc::BrotliEncoderParams {
        quality: 2,
        ..Default::default()
    };
    if brotli::BrotliCompress(&mut &data[..], &mut compressed, &params).is_err() {
        return 0.0;
    }

    compressed.len() as f64 / data.len() as f64
}

/// High-order entropy of the whole core, using the fixed 12-byte cell encoding.
///
/// A freshly initialized core is one instruction repeated and scores near
/// zero. Bombers and replicators scatter distinct cells and push it up.
pub fn core_entropy(core: &Core) -> f64 {
    high_order_entropy(&core.to_bytes())
}

/// Count the cells holding each opcode, indexed like
/// [`Opcode::ALL`](crate::instruction::Opcode::ALL).
pub fn opcode_histogram(core: &Core) -> [usize; 16] {
    let mut hist = [0usize; 16];
    for cell in core.cells() {
        hist[cell.opcode as usize] += 1;
    }
    hist
}
