// BNF Map Checker - Core Library
// Checks the NHSBSA BNF code change maps against raw prescribing data

pub mod config;
pub mod db;
pub mod error;
pub mod facts;
pub mod listing;
pub mod logging;
pub mod map_quality;
pub mod mapping;
pub mod period;
pub mod pipeline;
pub mod prefix_index;
pub mod reconciliation;
pub mod report;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    import_csv, insert_facts, setup_database, verify_count, ImportOutcome, SqliteWarehouse,
};
pub use error::{CheckerError, Result};
pub use facts::{
    load_facts, CachePolicy, CodeFilter, CsvFactFile, FactLoad, FactSource, PrescribingFact,
};
pub use listing::{GithubListing, LocalDirectory, MapFile, MapSource};
pub use map_quality::{IssueKind, MapIssue, MapQualityEngine, MapQualityReport, Severity};
pub use mapping::{load_maps, parse_map_text, CodeMapping, MapLoadReport};
pub use pipeline::{run_check, CheckOutcome};
pub use prefix_index::PrefixIndex;
pub use reconciliation::{
    CollisionRecord, PartialMatch, ReconciledRecord, ReconciliationEngine, ReconciliationReport,
    ReconciliationStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
