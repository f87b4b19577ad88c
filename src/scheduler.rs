use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::engine::{self, ExecutionEffect, Process};
use crate::memory::{Core, WarriorId};
use crate::metrics::WarriorStats;

/// FIFO of live program counters for one warrior.
///
/// The warrior is alive while its queue is non-empty.
#[derive(Clone, Debug)]
pub struct ProcessQueue {
    warrior: WarriorId,
    pcs: VecDeque<usize>,
}

impl ProcessQueue {
    pub fn new(warrior: WarriorId, start: usize) -> Self {
        let mut pcs = VecDeque::new();
        pcs.push_back(start);
        Self { warrior, pcs }
    }

    pub fn warrior(&self) -> WarriorId {
        self.warrior
    }

    pub fn len(&self) -> usize {
        self.pcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcs.is_empty()
    }

    /// The process that runs on this warrior's next turn.
    pub fn front(&self) -> Option<Process> {
        self.pcs.front().map(|&pc| Process {
            warrior: self.warrior,
            pc,
        })
    }

    fn pop(&mut self) -> Option<Process> {
        self.pcs.pop_front().map(|pc| Process {
            warrior: self.warrior,
            pc,
        })
    }

    fn push(&mut self, pc: usize) {
        self.pcs.push_back(pc);
    }

    /// Program counters in execution order.
    pub fn pcs(&self) -> impl Iterator<Item = usize> + '_ {
        self.pcs.iter().copied()
    }
}

/// Round-robin scheduler over every warrior's process queue.
///
/// One cycle gives each living warrior exactly one turn, in warrior order,
/// no matter how many processes it owns.
#[derive(Clone, Debug)]
pub struct Scheduler {
    queues: Vec<ProcessQueue>,
    max_processes: usize,
    cycle: u64,
    stats: Vec<WarriorStats>,
    eliminated_at: Vec<Option<u64>>,
}

impl Scheduler {
    /// Seed one process per warrior at the given entry addresses.
    pub fn new(entries: &[usize], max_processes: usize) -> Self {
        let queues = entries
            .iter()
            .enumerate()
            .map(|(id, &pc)| ProcessQueue::new(id, pc))
            .collect();
        let stats = entries
            .iter()
            .map(|_| WarriorStats {
                peak_processes: 1,
                ..Default::default()
            })
            .collect();
        Self {
            queues,
            max_processes,
            cycle: 0,
            stats,
            eliminated_at: vec![None; entries.len()],
        }
    }

    /// Completed cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn warrior_count(&self) -> usize {
        self.queues.len()
    }

    pub fn is_alive(&self, warrior: WarriorId) -> bool {
        !self.queues[warrior].is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.queues.iter().filter(|q| !q.is_empty()).count()
    }

    pub fn process_count(&self, warrior: WarriorId) -> usize {
        self.queues[warrior].len()
    }

    pub fn queue(&self, warrior: WarriorId) -> &ProcessQueue {
        &self.queues[warrior]
    }

    pub fn stats(&self, warrior: WarriorId) -> &WarriorStats {
        &self.stats[warrior]
    }

    /// Cycle in which the warrior lost its last process.
    pub fn eliminated_at(&self, warrior: WarriorId) -> Option<u64> {
        self.eliminated_at[warrior]
    }

    /// Run one full cycle: a single turn for every living warrior.
    pub fn run_cycle(&mut self, core: &mut Core) {
        self.cycle += 1;
        for warrior in 0..self.queues.len() {
            if self.is_alive(warrior) {
                self.turn(warrior, core);
            }
        }
    }

    /// Execute the front process of one warrior and requeue per its effect.
    fn turn(&mut self, warrior: WarriorId, core: &mut Core) {
        let Some(process) = self.queues[warrior].pop() else {
            return;
        };
        trace!(
            cycle = self.cycle,
            warrior,
            pc = process.pc,
            instruction = %core.read(process.pc as i64),
            "execute"
        );

        core.touch(process.pc as i64, warrior);
        let effect = engine::step(process, core);
        let stats = &mut self.stats[warrior];
        stats.instructions_executed += 1;
        let queue = &mut self.queues[warrior];

        match effect {
            ExecutionEffect::Advance(pc) | ExecutionEffect::Skip(pc) => queue.push(pc),
            ExecutionEffect::Terminate => {}
            ExecutionEffect::Fork { next, new } => {
                queue.push(next);
                // The popped process still counts as live while deciding.
                if queue.len() < self.max_processes {
                    queue.push(new);
                    stats.processes_spawned += 1;
                }
            }
        }

        stats.peak_processes = stats.peak_processes.max(queue.len());
        if queue.is_empty() {
            debug!(cycle = self.cycle, warrior, "warrior eliminated");
            self.eliminated_at[warrior] = Some(self.cycle);
        }
    }
}
