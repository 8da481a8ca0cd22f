// Fri Jan 16 2026 - Alex

pub mod cpu;
pub mod driver;
pub mod error;
pub mod exec;
pub mod flags;
pub mod hooks;
pub mod machine;

pub use cpu::Cpu;
pub use driver::{EmulationDriver, EmulationOptions, RETURN_SENTINEL};
pub use error::EmulationError;
pub use exec::Step;
pub use flags::EFlags;
pub use hooks::Hooks;
pub use machine::Machine;
