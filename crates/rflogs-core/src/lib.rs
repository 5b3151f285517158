pub mod artifacts;
pub mod config;
pub mod jobs;
pub mod model;
pub mod parser;
pub mod query;
pub mod storage;
pub mod tags;
pub mod timing;

pub use model::{ParsedStats, RunInfo, RunPage, Verdict};
pub use query::TagFilters;
pub use storage::{Store, StoreError};
