// Local file system artifacts: listing batches, saved job titles, and the run marker.

pub mod batches;
pub mod liveness;
pub mod titles;

pub use batches::CsvBatchStore;
pub use liveness::LivenessMarker;
pub use titles::TitleFile;
