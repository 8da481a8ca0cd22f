// Tue Jan 13 2026 - Alex

pub mod error;
pub mod result;
pub mod store;

pub use error::ProbeError;
pub use result::{CombinedResults, ProbeMethod, StructureOffsetResult};
pub use store::{StDataMgrFinder, StoreField};
