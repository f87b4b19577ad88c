pub mod instruction;
pub mod compiler;
pub mod memory;
pub mod engine;
pub mod scheduler;
pub mod battle;
pub mod placement;
pub mod metrics;

pub use battle::{BattleConfig, BattleResult, ConfigError, Outcome, run_battle};
pub use compiler::{ParseError, Warrior, compile};
