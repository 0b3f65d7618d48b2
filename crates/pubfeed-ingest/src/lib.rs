//! Pubfeed Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Imports publisher content exports into a content store.
//!
//! # Supported Sources
//!
//! - **legacy-dialog**: Dialog web stories and picture galleries
//! - **wire-nitf**: wire-service NITF articles
//! - **editorial-suite**: WoodWing article exports
//! - **sports-results**: Dialog sports result tables
//! - **tabular-subscriber**: Alfa subscription feeds (CSV, JSON or XML)
//!
//! # Example
//!
//! ```no_run
//! use pubfeed_ingest::config::ConfigLoader;
//! use pubfeed_ingest::plan::ImportPlan;
//! use pubfeed_ingest::store::SqliteStore;
//! use pubfeed_ingest::ImportOrchestrator;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new("config/importer.json").load()?;
//!     let store = SqliteStore::open(Path::new("pubfeed.db"), Path::new("uploads"))?;
//!     store.set_current_user(store.bootstrap_importer()?)?;
//!
//!     let plan = ImportPlan::builder(&config).publisher(Some("pz")).build()?;
//!     let report = ImportOrchestrator::new(&store).run(&plan)?;
//!     for line in report.summary() {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod attachments;
pub mod config;
pub mod error;
pub mod feed;
pub mod identity;
pub mod lookup;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod plan;
pub mod report;
pub mod store;
pub mod xml;

pub use error::{IngestError, RecordError, Result};
pub use orchestrator::ImportOrchestrator;
pub use report::{ImportReport, RecordOutcome};
