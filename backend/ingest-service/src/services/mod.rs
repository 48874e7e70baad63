pub mod ingest;
pub mod privacy;

pub use ingest::IngestService;
pub use privacy::{DeletionReport, PrivacyService};
