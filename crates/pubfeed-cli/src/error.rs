//! Error types for the pubfeed CLI

use pubfeed_ingest::config::ConfigError;
use pubfeed_ingest::store::StoreError;
use pubfeed_ingest::IngestError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}. Check the files passed with --config and --site-config.")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}. Run 'pubfeed init-store' if the database does not exist yet.")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown user '{0}'. Pass the login of an existing administrator with --user.")]
    UnknownUser(String),

    /// The run finished, but some records failed
    #[error("{0} record(s) failed or reconciliation did not complete")]
    ImportFailed(usize),
}
