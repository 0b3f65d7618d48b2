//! Import errors
//!
//! [`IngestError`] aborts a run before any record is touched. [`RecordError`]
//! fails one record; the batch carries on.

use crate::attachments::AttachmentError;
use crate::config::ConfigError;
use crate::parser::ParserError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Parse(#[from] ParserError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("An account with login '{0}' exists but is not linked to this subscription")]
    DuplicateLogin(String),
}
