//! Source parsers
//!
//! One parser per source dialect. Parsers are a closed set: a
//! [`ParserKind`] named in the configuration becomes a [`Parser`] when the
//! import plan is built, and the orchestrator only ever talks to the
//! [`SourceParser`] trait.
//!
//! Parsing is a pure function of the raw record bytes and the
//! [`ParseContext`]; all store data a parser needs comes from the per-run
//! [`LookupCache`].

pub mod dialog;
pub mod editorial;
pub mod html;
pub mod nitf;
pub mod sports;
pub mod subscription;

pub use dialog::DialogParser;
pub use editorial::EditorialParser;
pub use nitf::NitfParser;
pub use sports::SportsParser;
pub use subscription::SubscriptionParser;

use crate::config::{PublisherConfig, TypeConfig};
use crate::lookup::LookupCache;
use crate::model::{AuthorRef, AuthorSource, CanonicalDocument, EntityKind, Guid, UserId};
use crate::xml::XmlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Malformed XML: {0}")]
    Xml(#[from] XmlError),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing {0}")]
    Missing(String),

    #[error("Invalid {field}: '{value}'")]
    Invalid { field: String, value: String },
}

impl ParserError {
    pub fn missing(what: impl Into<String>) -> Self {
        Self::Missing(what.into())
    }

    pub fn invalid(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            value: value.into(),
        }
    }
}

pub type ParseResult<T> = std::result::Result<T, ParserError>;

/// Source dialect named in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    LegacyDialog,
    WireNitf,
    EditorialSuite,
    SportsResults,
    TabularSubscriber,
}

impl ParserKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParserKind::LegacyDialog => "legacy-dialog",
            ParserKind::WireNitf => "wire-nitf",
            ParserKind::EditorialSuite => "editorial-suite",
            ParserKind::SportsResults => "sports-results",
            ParserKind::TabularSubscriber => "tabular-subscriber",
        }
    }

    /// Whether records arrive in one container file rather than one file each
    pub fn is_feed(self) -> bool {
        matches!(self, ParserKind::TabularSubscriber)
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw record handed to a parser
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub bytes: Vec<u8>,
    /// File name without extension; empty for feed records
    pub stem: String,
    pub path: Option<PathBuf>,
}

impl RawRecord {
    pub fn new(bytes: Vec<u8>, stem: impl Into<String>) -> Self {
        Self {
            bytes,
            stem: stem.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}

/// Result of the cheap identity pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    Record(String),
    Skip(String),
}

/// Result of a full parse
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Document(Box<CanonicalDocument>),
    Skip(String),
}

/// Everything a parser may read besides the raw bytes
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub publisher: &'a PublisherConfig,
    pub record_type: &'a str,
    pub type_config: &'a TypeConfig,
    pub lookups: &'a LookupCache,
    /// Author of the entity a previous import created, if any
    pub existing_author: Option<UserId>,
}

impl<'a> ParseContext<'a> {
    pub fn new(
        publisher: &'a PublisherConfig,
        record_type: &'a str,
        type_config: &'a TypeConfig,
        lookups: &'a LookupCache,
    ) -> Self {
        Self {
            publisher,
            record_type,
            type_config,
            lookups,
            existing_author: None,
        }
    }

    pub fn with_existing_author(mut self, author: Option<UserId>) -> Self {
        self.existing_author = author;
        self
    }

    pub fn system(&self) -> &'a str {
        self.publisher.system_for(self.type_config)
    }

    pub fn guid(&self, external_id: &str) -> Guid {
        Guid::new(&self.publisher.id, self.system(), external_id)
    }

    /// Upload name for a media basename
    pub fn target_name(&self, basename: &str) -> String {
        format!("{}{}", self.publisher.uploads_prefix, basename)
    }

    /// Start a document with the fields every record carries.
    pub fn document(&self, external_id: &str, kind: EntityKind, raw: &[u8]) -> CanonicalDocument {
        let mut doc = CanonicalDocument::new(self.guid(external_id), external_id, kind, raw.to_vec());
        doc.set_meta("_publisher", self.publisher.id.as_str());
        doc.set_meta("_importer_id", external_id);
        doc
    }

    /// Whether the fallback author chain should run at all
    pub fn needs_fallback_author(&self, doc: &CanonicalDocument) -> bool {
        doc.author.is_none() && self.existing_author.is_none()
    }

    pub fn default_author(&self) -> Option<AuthorRef> {
        let login = self.publisher.default_author_for(self.type_config)?;
        self.lookups
            .user_by_login(login)
            .map(|id| AuthorRef::new(id, AuthorSource::Default))
    }
}

/// A source dialect parser
pub trait SourceParser {
    fn kind(&self) -> ParserKind;

    /// Extension of one-file-per-record inputs
    fn file_extension(&self) -> &'static str {
        "xml"
    }

    /// Normalize raw bytes before identity checks, parsing and storage.
    fn prepare_raw(&self, raw: Vec<u8>) -> Vec<u8> {
        raw
    }

    /// Whether manual edits in the store protect an entity from re-import
    fn tracks_manual_edits(&self) -> bool {
        true
    }

    /// Whether a full pass cancels entities missing from the feed
    fn reconciles(&self) -> bool {
        false
    }

    /// Extract the external id without building a document.
    fn identify(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<Identification>;

    /// Build the canonical document for a record.
    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome>;
}

/// The closed set of parsers
#[derive(Debug, Clone)]
pub enum Parser {
    LegacyDialog(DialogParser),
    WireNitf(NitfParser),
    EditorialSuite(EditorialParser),
    SportsResults(SportsParser),
    TabularSubscriber(SubscriptionParser),
}

impl Parser {
    pub fn from_kind(kind: ParserKind) -> Self {
        match kind {
            ParserKind::LegacyDialog => Parser::LegacyDialog(DialogParser),
            ParserKind::WireNitf => Parser::WireNitf(NitfParser),
            ParserKind::EditorialSuite => Parser::EditorialSuite(EditorialParser),
            ParserKind::SportsResults => Parser::SportsResults(SportsParser),
            ParserKind::TabularSubscriber => Parser::TabularSubscriber(SubscriptionParser),
        }
    }

    fn inner(&self) -> &dyn SourceParser {
        match self {
            Parser::LegacyDialog(p) => p,
            Parser::WireNitf(p) => p,
            Parser::EditorialSuite(p) => p,
            Parser::SportsResults(p) => p,
            Parser::TabularSubscriber(p) => p,
        }
    }
}

impl SourceParser for Parser {
    fn kind(&self) -> ParserKind {
        self.inner().kind()
    }

    fn file_extension(&self) -> &'static str {
        self.inner().file_extension()
    }

    fn prepare_raw(&self, raw: Vec<u8>) -> Vec<u8> {
        self.inner().prepare_raw(raw)
    }

    fn tracks_manual_edits(&self) -> bool {
        self.inner().tracks_manual_edits()
    }

    fn reconciles(&self) -> bool {
        self.inner().reconciles()
    }

    fn identify(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<Identification> {
        self.inner().identify(record, ctx)
    }

    fn parse(&self, record: &RawRecord, ctx: &ParseContext<'_>) -> ParseResult<ParseOutcome> {
        self.inner().parse(record, ctx)
    }
}
