//! Canonical content model
//!
//! Every source dialect is parsed into a [`CanonicalDocument`]. The document is
//! a plain typed struct; writing it back onto an entity loaded from the store
//! goes through [`DocumentMerge`], never through generic field pass-through.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type EntityId = i64;
pub type UserId = i64;
pub type TermId = i64;

/// Free-tagging taxonomies accept term names that do not exist yet.
pub const FREE_TAGGING_TAXONOMIES: &[&str] = &["post_tag", "location"];

/// Stable external identity: `publisher/system/external_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    pub fn new(publisher: &str, system: &str, external_id: &str) -> Self {
        Self(format!("{}/{}/{}", publisher, system, external_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    Gallery,
    SportsTable,
    Subscription,
    Attachment,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Gallery => "gallery",
            EntityKind::SportsTable => "sports_table",
            EntityKind::Subscription => "subscription",
            EntityKind::Attachment => "attachment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(EntityKind::Post),
            "gallery" => Ok(EntityKind::Gallery),
            "sports_table" => Ok(EntityKind::SportsTable),
            "subscription" => Ok(EntityKind::Subscription),
            "attachment" => Ok(EntityKind::Attachment),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Publish,
    Pending,
    Scheduled,
    Active,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Publish => "publish",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Scheduled => "scheduled",
            DocumentStatus::Active => "active",
            DocumentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "publish" => Ok(DocumentStatus::Publish),
            "pending" => Ok(DocumentStatus::Pending),
            "scheduled" => Ok(DocumentStatus::Scheduled),
            "active" => Ok(DocumentStatus::Active),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// How the author of a document was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorSource {
    /// Named in the record metadata and found among the users
    Explicit,
    /// Display name found in the byline or body text
    Matched,
    /// Trailing paraph found in the initials registry
    Initials,
    /// Configured default author
    Default,
    /// Kept from the previously imported entity
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub user_id: UserId,
    pub source: AuthorSource,
}

impl AuthorRef {
    pub fn new(user_id: UserId, source: AuthorSource) -> Self {
        Self { user_id, source }
    }
}

/// A term to assign; `id` is `None` for free-tagging names not resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRef {
    pub name: String,
    pub id: Option<TermId>,
}

impl TermRef {
    pub fn resolved(name: impl Into<String>, id: TermId) -> Self {
        Self {
            name: name.into(),
            id: Some(id),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }
}

/// Taxonomy name to ordered, de-duplicated terms
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaxonomyAssignment(IndexMap<String, IndexMap<String, TermRef>>);

impl TaxonomyAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term; the first assignment of a name wins.
    pub fn add(&mut self, taxonomy: &str, term: TermRef) {
        self.0
            .entry(taxonomy.to_string())
            .or_default()
            .entry(term.name.clone())
            .or_insert(term);
    }

    pub fn remove(&mut self, taxonomy: &str, name: &str) -> Option<TermRef> {
        self.0.get_mut(taxonomy)?.shift_remove(name)
    }

    pub fn contains(&self, taxonomy: &str, name: &str) -> bool {
        self.0
            .get(taxonomy)
            .is_some_and(|terms| terms.contains_key(name))
    }

    pub fn is_empty_for(&self, taxonomy: &str) -> bool {
        self.0.get(taxonomy).map_or(true, |terms| terms.is_empty())
    }

    pub fn terms(&self, taxonomy: &str) -> Vec<&TermRef> {
        self.0
            .get(taxonomy)
            .map(|terms| terms.values().collect())
            .unwrap_or_default()
    }

    pub fn names(&self, taxonomy: &str) -> Vec<&str> {
        self.terms(taxonomy).into_iter().map(|t| t.name.as_str()).collect()
    }

    /// Taxonomies in assignment order with their terms
    pub fn iter(&self) -> impl Iterator<Item = (&str, Vec<&TermRef>)> {
        self.0
            .iter()
            .map(|(taxonomy, terms)| (taxonomy.as_str(), terms.values().collect()))
    }
}

/// A media file referenced from a document body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaReference {
    /// Name as referenced by the source, also the key in the document's media map
    pub filename: String,
    /// Upload name: configured prefix plus basename
    pub target_name: String,
    pub caption: Option<String>,
    pub credit: Option<String>,
    pub alt: Option<String>,
    /// Source metadata carried onto the attachment as meta fields
    pub extra: IndexMap<String, String>,
}

impl MediaReference {
    pub fn new(filename: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            target_name: target_name.into(),
            ..Default::default()
        }
    }

    /// Basename used in the body placeholder
    pub fn basename(&self) -> &str {
        self.filename.rsplit('/').next().unwrap_or(&self.filename)
    }

    pub fn placeholder(&self) -> String {
        placeholder(self.basename())
    }
}

/// Body marker left at the position of a media file.
pub fn placeholder(basename: &str) -> String {
    format!("<!-- {} -->", basename)
}

/// Customer account data carried by subscription records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberAccount {
    /// Login for newly created accounts; the subscription number
    pub login: String,
    pub email: String,
    pub password: Option<String>,
    pub last_name: String,
    pub first_name: Option<String>,
    pub editions: Vec<String>,
}

/// The normalized form of one imported record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalDocument {
    pub external_id: String,
    pub guid: Guid,
    pub kind: EntityKind,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub status: DocumentStatus,
    pub published_at: Option<NaiveDateTime>,
    pub comments_open: Option<bool>,
    pub author: Option<AuthorRef>,
    pub taxonomies: TaxonomyAssignment,
    pub meta: BTreeMap<String, Value>,
    pub media: IndexMap<String, MediaReference>,
    pub subscriber: Option<SubscriberAccount>,
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub entity_id: Option<EntityId>,
}

impl CanonicalDocument {
    pub fn new(guid: Guid, external_id: impl Into<String>, kind: EntityKind, raw: Vec<u8>) -> Self {
        Self {
            external_id: external_id.into(),
            guid,
            kind,
            title: String::new(),
            body: String::new(),
            excerpt: String::new(),
            status: DocumentStatus::Draft,
            published_at: None,
            comments_open: None,
            author: None,
            taxonomies: TaxonomyAssignment::new(),
            meta: BTreeMap::new(),
            media: IndexMap::new(),
            subscriber: None,
            raw,
            entity_id: None,
        }
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.meta.insert(key.to_string(), value.into());
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn is_gallery(&self) -> bool {
        self.kind == EntityKind::Gallery
    }
}

/// Fields of a previously persisted entity that a re-import may keep
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExistingFields {
    pub entity_id: Option<EntityId>,
    pub author: Option<UserId>,
    pub published_at: Option<NaiveDateTime>,
    pub comments_open: Option<bool>,
}

/// The enumerated write-back of a parsed document onto an existing entity
///
/// - the entity id is always carried over
/// - an author that was not explicitly named in the record never replaces
///   the stored author
/// - publish time and comment flag fall back to the stored values when the
///   record does not carry them
pub struct DocumentMerge;

impl DocumentMerge {
    pub fn apply(mut doc: CanonicalDocument, existing: &ExistingFields) -> CanonicalDocument {
        doc.entity_id = existing.entity_id;

        let explicit = matches!(doc.author, Some(AuthorRef { source: AuthorSource::Explicit, .. }));
        if !explicit {
            if let Some(user_id) = existing.author {
                doc.author = Some(AuthorRef::new(user_id, AuthorSource::Existing));
            }
        }

        if doc.published_at.is_none() {
            doc.published_at = existing.published_at;
        }
        if doc.comments_open.is_none() {
            doc.comments_open = existing.comments_open;
        }
        doc
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn doc() -> CanonicalDocument {
        CanonicalDocument::new(Guid::new("pz", "woodwing", "4711"), "4711", EntityKind::Post, b"<a/>".to_vec())
    }

    #[test]
    fn test_guid_format() {
        let guid = Guid::new("pz", "woodwing", "4711");
        assert_eq!(guid.as_str(), "pz/woodwing/4711");
        assert_eq!(guid.to_string(), "pz/woodwing/4711");
    }

    #[test]
    fn test_taxonomy_assignment_dedupes_and_keeps_order() {
        let mut tax = TaxonomyAssignment::new();
        tax.add("category", TermRef::resolved("Sport", 2));
        tax.add("category", TermRef::resolved("Politik", 1));
        tax.add("category", TermRef::resolved("Sport", 99));

        assert_eq!(tax.names("category"), vec!["Sport", "Politik"]);
        assert_eq!(tax.terms("category")[0].id, Some(2));

        tax.remove("category", "Sport");
        assert_eq!(tax.names("category"), vec!["Politik"]);
        assert!(tax.is_empty_for("location"));
    }

    #[test]
    fn test_media_placeholder_uses_basename() {
        let media = MediaReference::new("images/2024/photo.jpg", "pz-photo.jpg");
        assert_eq!(media.basename(), "photo.jpg");
        assert_eq!(media.placeholder(), "<!-- photo.jpg -->");
    }

    #[test]
    fn test_merge_keeps_existing_author_unless_explicit() {
        let existing = ExistingFields {
            entity_id: Some(7),
            author: Some(3),
            published_at: NaiveDate::from_ymd_opt(2024, 1, 2).and_then(|d| d.and_hms_opt(4, 0, 0)),
            comments_open: Some(false),
        };

        let mut matched = doc();
        matched.author = Some(AuthorRef::new(9, AuthorSource::Default));
        let merged = DocumentMerge::apply(matched, &existing);
        assert_eq!(merged.entity_id, Some(7));
        assert_eq!(merged.author, Some(AuthorRef::new(3, AuthorSource::Existing)));
        assert_eq!(merged.published_at, existing.published_at);
        assert_eq!(merged.comments_open, Some(false));

        let mut explicit = doc();
        explicit.author = Some(AuthorRef::new(9, AuthorSource::Explicit));
        explicit.comments_open = Some(true);
        let merged = DocumentMerge::apply(explicit, &existing);
        assert_eq!(merged.author, Some(AuthorRef::new(9, AuthorSource::Explicit)));
        assert_eq!(merged.comments_open, Some(true));
    }

    #[test]
    fn test_status_and_kind_round_trip_names() {
        for status in [DocumentStatus::Draft, DocumentStatus::Pending, DocumentStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert_eq!("sports_table".parse::<EntityKind>().unwrap(), EntityKind::SportsTable);
        assert!("page".parse::<EntityKind>().is_err());
    }
}
