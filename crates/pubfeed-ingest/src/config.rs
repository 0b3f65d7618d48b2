//! Importer configuration
//!
//! A JSON document keyed by publisher id. A site-local document may be
//! deep-merged on top of it; objects merge recursively, every other value is
//! replaced. Relative paths resolve against the configuration root and every
//! referenced directory or file must exist.

use crate::parser::ParserKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Defaults
// ============================================================================

/// Default safety ceiling for subscription reconciliation
pub const DEFAULT_RECONCILE_CEILING: usize = 400;

/// Default time of day for records that only carry a publication date
pub const DEFAULT_PUBLISH_TIME: &str = "04:00:00";

pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";

pub const DEFAULT_CATEGORY: &str = "news";

fn default_author_prefixes() -> Vec<String> {
    vec!["von ".to_string(), "by ".to_string()]
}

fn default_credit_markers() -> Vec<String> {
    [
        "Foto",
        "Fotos",
        "Quelle",
        "Archivfoto",
        "Archivfotos",
        "Photo",
        "Photos",
        "Source",
        "Archive photo",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_embed_size() -> String {
    "medium".to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_reconcile_ceiling() -> usize {
    DEFAULT_RECONCILE_CEILING
}

fn default_publish_time() -> String {
    DEFAULT_PUBLISH_TIME.to_string()
}

fn default_excluded_sections() -> Vec<String> {
    vec!["Lokales".to_string()]
}

fn default_scope_categories() -> IndexMap<String, String> {
    [
        ("pl", "Politik"),
        ("sp", "Sport"),
        ("vm", "Blick in die Welt"),
        ("wi", "Wirtschaft"),
        ("ku", "Kultur"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_skip_patterns() -> Vec<String> {
    [
        "topthemen",
        "eilmeldungen",
        "schlaglichter",
        "kalenderblatt",
        "bild",
        "boersefrankfurttabelle",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration '{path}' is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("'{publisher}/{record_type}' {what} not found: '{path}'")]
    MissingPath {
        publisher: String,
        record_type: String,
        what: &'static str,
        path: PathBuf,
    },

    #[error("Unknown publisher '{0}'")]
    UnknownPublisher(String),

    #[error("Unknown record type '{record_type}' for publisher '{publisher}'")]
    UnknownType {
        publisher: String,
        record_type: String,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Configuration types
// ============================================================================

/// Maps a `JA` flag field onto a taxonomy term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagMapping {
    pub field: String,
    pub taxonomy: String,
    pub term: String,
}

/// Container format of a multi-record feed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Csv,
    Json,
    Xml,
}

impl FeedFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(FeedFormat::Csv),
            "json" => Some(FeedFormat::Json),
            "xml" => Some(FeedFormat::Xml),
            _ => None,
        }
    }
}

/// One record type of a publisher (articles, sports tables, subscriptions, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeConfig {
    pub parser: ParserKind,

    /// Source system id; overrides the publisher's
    #[serde(default)]
    pub system: Option<String>,

    /// Directory with one file per record
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Single multi-record feed file
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub feed_format: Option<FeedFormat>,

    /// Directory the referenced media files live in
    #[serde(default)]
    pub media: Option<PathBuf>,

    /// Media folder new attachments are moved into
    #[serde(default)]
    pub media_folder: Option<String>,

    #[serde(default)]
    pub recursive: bool,

    #[serde(default)]
    pub default_author: Option<String>,

    /// Image size used in embedded figure markup
    #[serde(default = "default_embed_size")]
    pub embed_size: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Product SKU subscriptions are billed under
    #[serde(default)]
    pub sku: Option<String>,

    #[serde(default = "default_reconcile_ceiling")]
    pub reconcile_ceiling: usize,

    /// Time of day appended to date-only publication dates
    #[serde(default = "default_publish_time")]
    pub publish_time: String,

    /// Section names never used as categories
    #[serde(default = "default_excluded_sections")]
    pub excluded_sections: Vec<String>,

    #[serde(default)]
    pub flags: Vec<FlagMapping>,

    /// Wire-service scope code to category name
    #[serde(default = "default_scope_categories")]
    pub scope_categories: IndexMap<String, String>,

    /// Wire-service filename fragments that mark noise feeds
    #[serde(default = "default_skip_patterns")]
    pub skip_patterns: Vec<String>,
}

impl TypeConfig {
    pub fn new(parser: ParserKind) -> Self {
        Self {
            parser,
            system: None,
            directory: None,
            file: None,
            feed_format: None,
            media: None,
            media_folder: None,
            recursive: false,
            default_author: None,
            embed_size: default_embed_size(),
            timezone: default_timezone(),
            sku: None,
            reconcile_ceiling: default_reconcile_ceiling(),
            publish_time: default_publish_time(),
            excluded_sections: default_excluded_sections(),
            flags: Vec::new(),
            scope_categories: default_scope_categories(),
            skip_patterns: default_skip_patterns(),
        }
    }

    /// Effective feed format: explicit, else from the file extension
    pub fn effective_feed_format(&self) -> Option<FeedFormat> {
        self.feed_format
            .or_else(|| self.file.as_deref().and_then(FeedFormat::from_path))
    }
}

/// Per-publisher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherConfig {
    /// Publisher id; the key of this entry
    #[serde(skip_deserializing, default)]
    pub id: String,

    pub system: String,

    /// Login of the fallback author
    #[serde(default)]
    pub default_author: Option<String>,

    /// Prefix prepended to uploaded media basenames
    #[serde(default)]
    pub uploads_prefix: String,

    /// Category slug or name used when no category resolves
    #[serde(default = "default_category")]
    pub default_category: String,

    #[serde(default = "default_author_prefixes")]
    pub author_prefixes: Vec<String>,

    #[serde(default = "default_credit_markers")]
    pub credit_markers: Vec<String>,

    #[serde(default)]
    pub types: IndexMap<String, TypeConfig>,
}

impl PublisherConfig {
    pub fn new(id: &str, system: &str) -> Self {
        Self {
            id: id.to_string(),
            system: system.to_string(),
            default_author: None,
            uploads_prefix: String::new(),
            default_category: default_category(),
            author_prefixes: default_author_prefixes(),
            credit_markers: default_credit_markers(),
            types: IndexMap::new(),
        }
    }

    /// Source system of a record type
    pub fn system_for<'a>(&'a self, type_config: &'a TypeConfig) -> &'a str {
        type_config.system.as_deref().unwrap_or(&self.system)
    }

    /// Default author login of a record type
    pub fn default_author_for<'a>(&'a self, type_config: &'a TypeConfig) -> Option<&'a str> {
        type_config
            .default_author
            .as_deref()
            .or(self.default_author.as_deref())
    }
}

/// The merged and validated importer configuration
#[derive(Debug, Clone, Serialize)]
pub struct ImporterConfig {
    /// Directory relative paths are resolved against
    pub root: PathBuf,

    #[serde(flatten)]
    pub publishers: IndexMap<String, PublisherConfig>,
}

impl ImporterConfig {
    /// Parse a configuration document without validating paths.
    pub fn from_value(value: Value, root: &Path) -> ConfigResult<Self> {
        let mut publishers: IndexMap<String, PublisherConfig> = serde_json::from_value(value)
            .map_err(|e| ConfigError::Malformed {
                path: root.to_path_buf(),
                source: e,
            })?;

        for (id, publisher) in publishers.iter_mut() {
            publisher.id = id.clone();
        }

        Ok(Self {
            root: root.to_path_buf(),
            publishers,
        })
    }

    pub fn publisher(&self, id: &str) -> ConfigResult<&PublisherConfig> {
        self.publishers
            .get(id)
            .ok_or_else(|| ConfigError::UnknownPublisher(id.to_string()))
    }

    /// Point the import directory of one publisher (or all) at `dir`.
    pub fn override_directory(&mut self, publisher: Option<&str>, dir: &Path) -> ConfigResult<()> {
        if let Some(id) = publisher {
            if !self.publishers.contains_key(id) {
                return Err(ConfigError::UnknownPublisher(id.to_string()));
            }
        }

        for (id, config) in self.publishers.iter_mut() {
            if publisher.is_some_and(|p| p != id) {
                continue;
            }
            for type_config in config.types.values_mut() {
                if type_config.directory.is_some() || type_config.file.is_none() {
                    type_config.directory = Some(dir.to_path_buf());
                }
            }
        }
        Ok(())
    }

    /// Resolve relative paths against the root and require them to exist.
    pub fn validate(&mut self) -> ConfigResult<()> {
        let root = self.root.clone();
        for (id, publisher) in self.publishers.iter_mut() {
            if publisher.system.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("publisher '{}' has no system id", id)));
            }

            for (name, type_config) in publisher.types.iter_mut() {
                if type_config.directory.is_none() && type_config.file.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "'{}/{}' needs a directory or a file",
                        id, name
                    )));
                }

                let resolve = |path: &Path, what: &'static str| -> ConfigResult<PathBuf> {
                    let joined = if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        root.join(path)
                    };
                    joined.canonicalize().map_err(|_| ConfigError::MissingPath {
                        publisher: id.clone(),
                        record_type: name.clone(),
                        what,
                        path: joined.clone(),
                    })
                };

                if let Some(dir) = &type_config.directory {
                    let resolved = resolve(dir, "import directory")?;
                    type_config.directory = Some(resolved);
                }
                if let Some(file) = &type_config.file {
                    let resolved = resolve(file, "import file")?;
                    type_config.file = Some(resolved);
                }
                if let Some(media) = &type_config.media {
                    let resolved = resolve(media, "media directory")?;
                    type_config.media = Some(resolved);
                }

                if type_config.parser.is_feed() && type_config.effective_feed_format().is_none() {
                    if let Some(file) = &type_config.file {
                        return Err(ConfigError::Invalid(format!(
                            "'{}/{}' has no feed format and '{}' has no known extension",
                            id,
                            name,
                            file.display()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Overlay `overlay` onto `base`: objects merge key by key, anything else replaces.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (slot, value) => *slot = value,
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Reads, merges and validates the configuration documents
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    base: PathBuf,
    site_override: Option<PathBuf>,
    root: Option<PathBuf>,
    directory_override: Option<(Option<String>, PathBuf)>,
}

impl ConfigLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            site_override: None,
            root: None,
            directory_override: None,
        }
    }

    /// Site-local document merged on top; ignored when the file is absent
    pub fn site_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.site_override = Some(path.into());
        self
    }

    /// Root for relative paths; defaults to the base document's directory
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Import directory override for one publisher, or all when `None`
    pub fn override_directory(mut self, publisher: Option<String>, dir: impl Into<PathBuf>) -> Self {
        self.directory_override = Some((publisher, dir.into()));
        self
    }

    fn read(path: &Path) -> ConfigResult<Value> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(self) -> ConfigResult<ImporterConfig> {
        let mut value = Self::read(&self.base)?;
        if !value.is_object() {
            return Err(ConfigError::Invalid(format!(
                "'{}' must contain an object keyed by publisher id",
                self.base.display()
            )));
        }

        if let Some(site) = &self.site_override {
            if site.exists() {
                debug!(path = %site.display(), "Merging site configuration");
                deep_merge(&mut value, Self::read(site)?);
            }
        }

        let root = match self.root {
            Some(root) => root,
            None => self
                .base
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let mut config = ImporterConfig::from_value(value, &root)?;
        if let Some((publisher, dir)) = &self.directory_override {
            config.override_directory(publisher.as_deref(), dir)?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_config(dir: &Path, value: &Value) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_deep_merge() {
        let mut base = json!({"pz": {"system": "woodwing", "types": {"articles": {"recursive": false}}}, "list": [1, 2]});
        deep_merge(
            &mut base,
            json!({"pz": {"types": {"articles": {"recursive": true}}}, "list": [3]}),
        );
        assert_eq!(base["pz"]["system"], "woodwing");
        assert_eq!(base["pz"]["types"]["articles"]["recursive"], true);
        assert_eq!(base["list"], json!([3]));
    }

    #[test]
    fn test_load_resolves_and_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("import/pz")).unwrap();
        let path = write_config(
            dir.path(),
            &json!({
                "pz": {
                    "system": "woodwing",
                    "types": {"articles": {"parser": "editorial-suite", "directory": "import/pz"}}
                }
            }),
        );

        let config = ConfigLoader::new(&path).load().unwrap();
        let publisher = config.publisher("pz").unwrap();
        assert_eq!(publisher.id, "pz");
        assert_eq!(publisher.default_category, "news");
        assert_eq!(publisher.author_prefixes, vec!["von ", "by "]);

        let articles = &publisher.types["articles"];
        assert_eq!(articles.parser, ParserKind::EditorialSuite);
        assert!(articles.directory.as_ref().unwrap().is_absolute());
        assert_eq!(articles.reconcile_ceiling, 400);
        assert_eq!(articles.publish_time, "04:00:00");
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            &json!({"pz": {"system": "woodwing", "types": {"articles": {"parser": "editorial-suite", "directory": "nope"}}}}),
        );
        let err = ConfigLoader::new(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::MissingPath { .. }));
    }

    #[test]
    fn test_unknown_parser_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            dir.path(),
            &json!({"pz": {"system": "x", "types": {"articles": {"parser": "ms-word", "directory": "."}}}}),
        );
        assert!(matches!(
            ConfigLoader::new(&path).load().unwrap_err(),
            ConfigError::Malformed { .. }
        ));
    }

    #[test]
    fn test_site_override_and_directory_override() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::create_dir_all(dir.path().join("c")).unwrap();
        let path = write_config(
            dir.path(),
            &json!({
                "pz": {"system": "woodwing", "types": {"articles": {"parser": "editorial-suite", "directory": "a"}}},
                "dpa": {"system": "dpa", "types": {"articles": {"parser": "wire-nitf", "directory": "a"}}}
            }),
        );
        let site = dir.path().join("site.json");
        std::fs::write(&site, r#"{"pz": {"uploadsPrefix": "pz-", "types": {"articles": {"directory": "b"}}}}"#).unwrap();

        let config = ConfigLoader::new(&path)
            .site_override(&site)
            .override_directory(Some("dpa".to_string()), dir.path().join("c"))
            .load()
            .unwrap();

        let pz = config.publisher("pz").unwrap();
        assert_eq!(pz.uploads_prefix, "pz-");
        assert!(pz.types["articles"].directory.as_ref().unwrap().ends_with("b"));
        let dpa = config.publisher("dpa").unwrap();
        assert!(dpa.types["articles"].directory.as_ref().unwrap().ends_with("c"));
    }

    #[test]
    fn test_feed_format_from_extension() {
        let mut type_config = TypeConfig::new(ParserKind::TabularSubscriber);
        type_config.file = Some(PathBuf::from("export.CSV"));
        assert_eq!(type_config.effective_feed_format(), Some(FeedFormat::Csv));
        type_config.feed_format = Some(FeedFormat::Json);
        assert_eq!(type_config.effective_feed_format(), Some(FeedFormat::Json));
    }
}
