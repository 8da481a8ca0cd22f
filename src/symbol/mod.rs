// Tue Jan 13 2026 - Alex

pub mod error;
pub mod map;
pub mod resolver;

pub use error::SymbolError;
pub use map::{load_symbol_map, parse_symbol_map, MapEntry};
pub use resolver::{Symbol, SymbolResolver, SymbolType};
