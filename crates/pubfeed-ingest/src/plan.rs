//! Import plans
//!
//! An [`ImportPlan`] is the validated configuration narrowed down to the
//! publishers and record types of one run, with a concrete [`Parser`] and
//! input source for each.

use crate::config::{ConfigError, ConfigResult, FeedFormat, ImporterConfig, PublisherConfig, TypeConfig};
use crate::parser::{Parser, SourceParser};
use std::path::{Path, PathBuf};

/// Where the records of one type come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    /// One file per record (or one feed per file for feed types)
    Directory { path: PathBuf, recursive: bool },
    /// A single record file, or a single feed
    File(PathBuf),
}

/// One publisher/type pair of a run
#[derive(Debug, Clone)]
pub struct PlannedType<'a> {
    pub publisher: &'a PublisherConfig,
    pub record_type: &'a str,
    pub type_config: &'a TypeConfig,
    pub parser: Parser,
    pub source: RecordSource,
}

impl PlannedType<'_> {
    /// Feed format of a container file of this type
    pub fn feed_format(&self, path: &Path) -> Option<FeedFormat> {
        self.type_config
            .feed_format
            .or_else(|| FeedFormat::from_path(path))
    }

    /// Whether a directory entry is an input of this type
    pub fn accepts(&self, path: &Path) -> bool {
        if self.parser.kind().is_feed() {
            return self.feed_format(path).is_some();
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.parser.file_extension()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportPlan<'a> {
    pub types: Vec<PlannedType<'a>>,
}

impl<'a> ImportPlan<'a> {
    pub fn builder(config: &'a ImporterConfig) -> ImportPlanBuilder<'a> {
        ImportPlanBuilder::new(config)
    }

    /// Product SKUs the lookup cache has to load
    pub fn skus(&self) -> Vec<&'a str> {
        let mut skus: Vec<&str> = self
            .types
            .iter()
            .filter_map(|t| t.type_config.sku.as_deref())
            .collect();
        skus.sort_unstable();
        skus.dedup();
        skus
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

pub struct ImportPlanBuilder<'a> {
    config: &'a ImporterConfig,
    publisher: Option<String>,
    record_type: Option<String>,
    file: Option<PathBuf>,
}

impl<'a> ImportPlanBuilder<'a> {
    pub fn new(config: &'a ImporterConfig) -> Self {
        Self {
            config,
            publisher: None,
            record_type: None,
            file: None,
        }
    }

    pub fn publisher(mut self, publisher: Option<impl Into<String>>) -> Self {
        self.publisher = publisher.map(Into::into);
        self
    }

    pub fn record_type(mut self, record_type: Option<impl Into<String>>) -> Self {
        self.record_type = record_type.map(Into::into);
        self
    }

    /// Import this one file instead of the configured source
    pub fn file(mut self, file: Option<impl Into<PathBuf>>) -> Self {
        self.file = file.map(Into::into);
        self
    }

    pub fn build(self) -> ConfigResult<ImportPlan<'a>> {
        let publishers: Vec<&PublisherConfig> = match &self.publisher {
            Some(id) => vec![self.config.publisher(id)?],
            None => self.config.publishers.values().collect(),
        };

        let mut types = Vec::new();
        for publisher in publishers {
            for (record_type, type_config) in &publisher.types {
                if self.record_type.as_deref().is_some_and(|t| t != record_type) {
                    continue;
                }
                types.push(PlannedType {
                    publisher,
                    record_type: record_type.as_str(),
                    type_config,
                    parser: Parser::from_kind(type_config.parser),
                    source: source_of(type_config, self.file.as_deref()),
                });
            }
        }

        if let Some(record_type) = &self.record_type {
            if types.is_empty() {
                return Err(ConfigError::UnknownType {
                    publisher: self.publisher.clone().unwrap_or_else(|| "*".to_string()),
                    record_type: record_type.clone(),
                });
            }
        }
        if let Some(file) = &self.file {
            if types.len() != 1 {
                return Err(ConfigError::Invalid(format!(
                    "'{}' matches {} record types; select one publisher and type",
                    file.display(),
                    types.len()
                )));
            }
            if !file.is_file() {
                return Err(ConfigError::Invalid(format!("'{}' is not a file", file.display())));
            }
        }

        Ok(ImportPlan { types })
    }
}

fn source_of(type_config: &TypeConfig, file: Option<&Path>) -> RecordSource {
    if let Some(file) = file {
        return RecordSource::File(file.to_path_buf());
    }
    match (&type_config.directory, &type_config.file) {
        (Some(dir), _) => RecordSource::Directory {
            path: dir.clone(),
            recursive: type_config.recursive,
        },
        (None, Some(file)) => RecordSource::File(file.clone()),
        // validation rejects types without either
        (None, None) => RecordSource::File(PathBuf::new()),
    }
}
