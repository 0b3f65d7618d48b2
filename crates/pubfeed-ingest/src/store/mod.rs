//! Content store abstraction
//!
//! The importer never talks to a concrete backend. Everything it needs from the
//! host system (entities by GUID, terms, users, attachments, products and the
//! acting user) goes through [`ContentStore`]. Two implementations ship with
//! the crate: [`MemoryStore`] for tests and dry runs, [`SqliteStore`] for a
//! local persistent store.

pub mod memory;
mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{DocumentStatus, EntityId, EntityKind, Guid, TermId, TermRef, UserId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Login of the account the importer acts as
pub const IMPORTER_LOGIN: &str = "system";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Duplicate GUID: {0}")]
    DuplicateGuid(String),

    #[error("Duplicate user login: {0}")]
    DuplicateLogin(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Store lock poisoned: {0}")]
    Lock(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// An entity as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEntity {
    pub id: EntityId,
    pub guid: Guid,
    pub kind: EntityKind,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub status: DocumentStatus,
    pub author: Option<UserId>,
    /// Last user that edited the entity outside the importer
    pub last_editor: Option<UserId>,
    pub published_at: Option<NaiveDateTime>,
    pub comments_open: Option<bool>,
    pub parent: Option<EntityId>,
    pub thumbnail: Option<EntityId>,
    pub meta: BTreeMap<String, Value>,
    pub terms: BTreeMap<String, Vec<TermId>>,
    /// Raw bytes of the record this entity was last imported from
    #[serde(skip)]
    pub raw: Option<Vec<u8>>,
    pub raw_fingerprint: Option<String>,
}

impl StoredEntity {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.meta.get(key).and_then(Value::as_i64)
    }
}

/// Entity fields written on insert and update
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    pub guid: Guid,
    pub kind: EntityKind,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub status: DocumentStatus,
    pub author: Option<UserId>,
    pub published_at: Option<NaiveDateTime>,
    pub comments_open: Option<bool>,
    pub parent: Option<EntityId>,
}

/// A local file to turn into an attachment entity
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentUpload {
    pub guid: Guid,
    pub parent: Option<EntityId>,
    /// Staged copy; the store takes it over
    pub staged_path: PathBuf,
    pub target_name: String,
    /// Original source filename, used as title
    pub title: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub taxonomy: String,
    pub name: String,
    pub slug: String,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Editor,
    Author,
    Customer,
    Subscriber,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Editor => "editor",
            Role::Author => "author",
            Role::Customer => "customer",
            Role::Subscriber => "subscriber",
        }
    }

    /// Roles whose display names are matched against bylines
    pub fn can_author(self) -> bool {
        matches!(self, Role::Administrator | Role::Editor | Role::Author)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "administrator" | "admin" => Ok(Role::Administrator),
            "editor" => Ok(Role::Editor),
            "author" => Ok(Role::Author),
            "customer" => Ok(Role::Customer),
            "subscriber" => Ok(Role::Subscriber),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Vec<Role>,
    /// Paraphs this user signs articles with
    pub initials: Vec<String>,
    pub meta: BTreeMap<String, Value>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Administrator)
    }
}

/// Fields for creating a user
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub password: Option<String>,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Vec<Role>,
}

/// Fields for updating a user; `None` leaves a field untouched
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub billing_period: String,
    pub billing_interval: String,
}

/// Storage backend for imported content
pub trait ContentStore: Send + Sync {
    // --- entities --------------------------------------------------------

    fn find_by_guid(&self, guid: &Guid) -> StoreResult<Option<StoredEntity>>;

    fn get_entity(&self, id: EntityId) -> StoreResult<Option<StoredEntity>>;

    fn insert_entity(&self, draft: &EntityDraft) -> StoreResult<EntityId>;

    fn update_entity(&self, id: EntityId, draft: &EntityDraft) -> StoreResult<()>;

    fn set_status(&self, id: EntityId, status: DocumentStatus) -> StoreResult<()>;

    fn set_meta(&self, id: EntityId, key: &str, value: &Value) -> StoreResult<()>;

    fn delete_meta(&self, id: EntityId, key: &str) -> StoreResult<()>;

    /// Replace the raw snapshot (and its fingerprint) of an entity.
    fn set_raw(&self, id: EntityId, raw: &[u8], fingerprint: &str) -> StoreResult<()>;

    fn delete_raw(&self, id: EntityId) -> StoreResult<()>;

    /// Replace the terms of one taxonomy. Terms without an id are looked up by
    /// name and created when missing.
    fn set_terms(&self, id: EntityId, taxonomy: &str, terms: &[TermRef]) -> StoreResult<Vec<TermId>>;

    fn list_by_kind(&self, kind: EntityKind) -> StoreResult<Vec<StoredEntity>>;

    // --- taxonomy --------------------------------------------------------

    fn list_terms(&self) -> StoreResult<Vec<Term>>;

    fn insert_term(&self, taxonomy: &str, name: &str, slug: &str) -> StoreResult<TermId>;

    fn set_term_synonyms(&self, id: TermId, synonyms: &[String]) -> StoreResult<()>;

    // --- users -----------------------------------------------------------

    fn list_users(&self) -> StoreResult<Vec<User>>;

    fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>>;

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    fn insert_user(&self, user: &NewUser) -> StoreResult<UserId>;

    fn update_user(&self, id: UserId, update: &UserUpdate) -> StoreResult<()>;

    fn set_user_meta(&self, id: UserId, key: &str, value: &Value) -> StoreResult<()>;

    fn set_user_initials(&self, id: UserId, initials: &[String]) -> StoreResult<()>;

    // --- attachments -----------------------------------------------------

    fn upload_attachment(&self, upload: &AttachmentUpload) -> StoreResult<EntityId>;

    fn update_attachment_caption(&self, id: EntityId, caption: &str) -> StoreResult<()>;

    fn attachment_url(&self, id: EntityId) -> StoreResult<Option<String>>;

    fn set_thumbnail(&self, id: EntityId, attachment: EntityId) -> StoreResult<()>;

    /// Move attachments into a media folder; `false` when the folder is unknown.
    fn move_to_folder(&self, folder: &str, attachments: &[EntityId]) -> StoreResult<bool>;

    // --- commerce and session --------------------------------------------

    fn find_product_by_sku(&self, sku: &str) -> StoreResult<Option<Product>>;

    fn insert_product(&self, product: &Product) -> StoreResult<i64>;

    /// The user the current run acts as.
    fn current_user(&self) -> StoreResult<Option<User>>;

    /// The importer's own account; edits by it keep an entity pristine.
    fn importer_user(&self) -> StoreResult<Option<User>> {
        self.find_user_by_login(IMPORTER_LOGIN)
    }
}

/// Status a store persists for a draft: publishing in the future schedules.
pub fn effective_status(
    status: DocumentStatus,
    published_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> DocumentStatus {
    match (status, published_at) {
        (DocumentStatus::Publish, Some(at)) if at > now => DocumentStatus::Scheduled,
        (status, _) => status,
    }
}

/// Slug for a term or folder name
pub fn slugify(name: &str) -> String {
    let folded = pubfeed_common::text::fold_accents(&name.to_lowercase());
    let mut slug = String::with_capacity(folded.len());
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Normalize an editor-supplied list (synonyms, initials): one entry per
/// line, no empties, sorted.
pub fn normalize_list<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = values
        .into_iter()
        .flat_map(|v| {
            v.as_ref()
                .split('\n')
                .map(|line| line.trim_end_matches('\r').to_string())
                .collect::<Vec<_>>()
        })
        .filter(|line| !line.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
