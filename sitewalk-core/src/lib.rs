pub mod data;
pub mod ingest;
pub mod load;
pub mod report;

pub use data::{Database, IndexRecord, LeafRecord, LoadSession, MergePolicy, SessionStatus};
pub use ingest::{IngestOptions, IngestReport, ingest};
pub use load::{LoadError, LoadOptions, LoadSummary, WalkOptions, execute_load, resolve_root};
