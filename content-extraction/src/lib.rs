//! Content extraction for deposition content reports
//!
//! Given a content type, this crate looks up its declarative definition and
//! produces a category -> rows mapping from one of two sources:
//!
//! - **Entry**: a single PDBx/mmCIF container file for one dataset
//! - **Summary**: relational resources spanning many datasets
//!
//! Entry requests may instead be forwarded to a peer site. Extracted entry
//! content passes through content-type keyed policy rules before it is
//! serialized to the report file.

pub mod cif;
pub mod config;
pub mod definitions;
pub mod extractors;
pub mod lock;
pub mod policy;
pub mod router;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use definitions::{Condition, ContentDefinition, ContentRegistry, Definitions, ResourceRef};
pub use extractors::database::{DatabaseExtractor, ResourceConnector, SqliteConnector};
pub use extractors::file::FileExtractor;
pub use extractors::proxy::{ProxyReportFetcher, RemoteContentClient, RetryPolicy};
pub use lock::NamedLock;
pub use policy::{PolicyFilter, PolicyRule};
pub use router::{write_report, ContentRouter, ReportRequest, RequestKind};
pub use types::{
    ExtractionError, ExtractionResult, Record, SourceKind, ValueType, ENTRY_REPORT_PREFIX,
    SUMMARY_REPORT_PREFIX,
};
