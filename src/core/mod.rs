pub mod fetcher;
pub mod matcher;
pub mod orchestrator;

pub use crate::domain::model::{Listing, ListingKey, Source, TargetSet};
pub use crate::domain::ports::{ListingStore, SourceAdapter};
pub use crate::utils::error::Result;
pub use fetcher::{FetchError, FetchSettings, Fetcher, Transport};
pub use matcher::{LocationPolicy, Matcher};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunStatus, StatusReport};
