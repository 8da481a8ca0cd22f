// Tue Jan 13 2026 - Alex

pub mod manager;
pub mod report;

pub use manager::OutputManager;
pub use report::{ReportFormat, ReportGenerator};
