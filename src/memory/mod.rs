// Tue Jan 13 2026 - Alex

pub mod address;
pub mod binary;
pub mod buffer;
pub mod emulated;
pub mod error;
pub mod protection;
pub mod range;
pub mod region;
pub mod traits;

pub use address::Address;
pub use binary::{load_x86_binary, BinaryImport, BinaryMemory, BinarySection, BinarySymbol};
pub use buffer::BufferMemory;
pub use emulated::EmulatedMemory;
pub use error::MemoryError;
pub use protection::Protection;
pub use range::MemoryRange;
pub use region::MemoryRegion;
pub use traits::{MemoryReader, MemoryWriter};
