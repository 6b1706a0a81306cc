pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod storage;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::ScoutConfig;
pub use core::{Fetcher, Matcher, Orchestrator, OrchestratorSettings};
pub use domain::model::{Listing, Source, TargetSet};
pub use storage::{CsvBatchStore, LivenessMarker, TitleFile};
pub use utils::error::{Result, ScoutError};
