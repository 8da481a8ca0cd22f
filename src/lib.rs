// Tue Jan 15 2026 - Alex

pub mod analysis;
pub mod config;
pub mod emulation;
pub mod finders;
pub mod memory;
pub mod output;
pub mod pattern;
pub mod symbol;
pub mod ui;
pub mod utils;

pub use config::Config;
pub use emulation::{EmulationDriver, Hooks};
pub use finders::{CombinedResults, StDataMgrFinder};
pub use output::OutputManager;
pub use pattern::TracerPattern;
