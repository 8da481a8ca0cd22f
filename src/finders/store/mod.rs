// Fri Jan 16 2026 - Alex

pub mod data_mgr;

pub use data_mgr::{StDataMgrFinder, StoreField};
