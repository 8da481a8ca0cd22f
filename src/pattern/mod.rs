// Fri Jan 16 2026 - Alex

pub mod tracer;

pub use tracer::TracerPattern;
