pub mod ingest;

pub use ingest::{IngestRequest, IngestService};
