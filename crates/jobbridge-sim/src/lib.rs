//! A simulated native job system for driving the bridge without a real
//! native library.

pub mod config;
mod guest;
pub mod ledger;
pub mod script;
pub mod system;

pub use config::SimConfig;
pub use ledger::LedgerStats;
pub use script::{JobScript, ScriptProperty, ScriptedOutcome};
pub use system::{SimJobSystem, SimStats};
