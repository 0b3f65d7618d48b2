//! In-memory content store
//!
//! Backs the test suite and `--dry-run` imports. Every mutating call is
//! counted so callers can assert that a re-import touched nothing.

use super::{
    effective_status, slugify, AttachmentUpload, ContentStore, EntityDraft, NewUser, Product,
    Role, StoreError, StoreResult, StoredEntity, Term, User, UserUpdate,
};
use crate::model::{DocumentStatus, EntityId, EntityKind, Guid, TermId, TermRef, UserId};
use chrono::Local;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    entities: IndexMap<EntityId, StoredEntity>,
    terms: Vec<Term>,
    users: Vec<User>,
    products: Vec<Product>,
    folders: HashMap<String, Vec<EntityId>>,
    attachment_urls: HashMap<EntityId, String>,
    current_user: Option<UserId>,
    next_id: i64,
    mutations: usize,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn entity_mut(&mut self, id: EntityId) -> StoreResult<&mut StoredEntity> {
        self.entities.get_mut(&id).ok_or(StoreError::EntityNotFound(id))
    }

    fn user_mut(&mut self, id: UserId) -> StoreResult<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::UserNotFound(id))
    }
}

/// Content store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Number of mutating calls since creation
    pub fn mutation_count(&self) -> usize {
        self.lock().map(|s| s.mutations).unwrap_or(0)
    }

    /// Act as the given user for subsequent runs.
    pub fn set_current_user(&self, id: UserId) -> StoreResult<()> {
        self.lock()?.current_user = Some(id);
        Ok(())
    }

    /// Record an edit made outside the importer, e.g. in an admin UI.
    pub fn record_manual_edit(&self, id: EntityId, editor: UserId) -> StoreResult<()> {
        self.lock()?.entity_mut(id)?.last_editor = Some(editor);
        Ok(())
    }

    /// Create a media folder attachments can be moved into.
    pub fn create_folder(&self, name: &str) -> StoreResult<()> {
        self.lock()?.folders.entry(name.to_string()).or_default();
        Ok(())
    }

    pub fn folder_contents(&self, name: &str) -> Vec<EntityId> {
        self.lock()
            .ok()
            .and_then(|s| s.folders.get(name).cloned())
            .unwrap_or_default()
    }

    pub fn entities(&self) -> Vec<StoredEntity> {
        self.lock()
            .map(|s| s.entities.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl ContentStore for MemoryStore {
    fn find_by_guid(&self, guid: &Guid) -> StoreResult<Option<StoredEntity>> {
        let state = self.lock()?;
        Ok(state.entities.values().find(|e| &e.guid == guid).cloned())
    }

    fn get_entity(&self, id: EntityId) -> StoreResult<Option<StoredEntity>> {
        Ok(self.lock()?.entities.get(&id).cloned())
    }

    fn insert_entity(&self, draft: &EntityDraft) -> StoreResult<EntityId> {
        let mut state = self.lock()?;
        if state.entities.values().any(|e| e.guid == draft.guid) {
            return Err(StoreError::DuplicateGuid(draft.guid.to_string()));
        }
        state.mutations += 1;
        let id = state.next_id();
        let now = Local::now().naive_local();
        state.entities.insert(
            id,
            StoredEntity {
                id,
                guid: draft.guid.clone(),
                kind: draft.kind,
                title: draft.title.clone(),
                body: draft.body.clone(),
                excerpt: draft.excerpt.clone(),
                status: effective_status(draft.status, draft.published_at, now),
                author: draft.author,
                last_editor: None,
                published_at: draft.published_at,
                comments_open: draft.comments_open,
                parent: draft.parent,
                thumbnail: None,
                meta: BTreeMap::new(),
                terms: BTreeMap::new(),
                raw: None,
                raw_fingerprint: None,
            },
        );
        Ok(id)
    }

    fn update_entity(&self, id: EntityId, draft: &EntityDraft) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let now = Local::now().naive_local();
        let entity = state.entity_mut(id)?;
        entity.title = draft.title.clone();
        entity.body = draft.body.clone();
        entity.excerpt = draft.excerpt.clone();
        entity.status = effective_status(draft.status, draft.published_at, now);
        entity.author = draft.author;
        entity.published_at = draft.published_at;
        entity.comments_open = draft.comments_open;
        entity.parent = draft.parent;
        Ok(())
    }

    fn set_status(&self, id: EntityId, status: DocumentStatus) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.entity_mut(id)?.status = status;
        Ok(())
    }

    fn set_meta(&self, id: EntityId, key: &str, value: &Value) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.entity_mut(id)?.meta.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete_meta(&self, id: EntityId, key: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.entity_mut(id)?.meta.remove(key);
        Ok(())
    }

    fn set_raw(&self, id: EntityId, raw: &[u8], fingerprint: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let entity = state.entity_mut(id)?;
        entity.raw = Some(raw.to_vec());
        entity.raw_fingerprint = Some(fingerprint.to_string());
        Ok(())
    }

    fn delete_raw(&self, id: EntityId) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let entity = state.entity_mut(id)?;
        entity.raw = None;
        entity.raw_fingerprint = None;
        Ok(())
    }

    fn set_terms(&self, id: EntityId, taxonomy: &str, terms: &[TermRef]) -> StoreResult<Vec<TermId>> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let mut ids = Vec::with_capacity(terms.len());
        for term in terms {
            let existing = match term.id {
                Some(term_id) => Some(term_id),
                None => state
                    .terms
                    .iter()
                    .find(|t| t.taxonomy == taxonomy && t.name == term.name)
                    .map(|t| t.id),
            };
            let term_id = match existing {
                Some(term_id) => term_id,
                None => {
                    let term_id = state.next_id();
                    state.terms.push(Term {
                        id: term_id,
                        taxonomy: taxonomy.to_string(),
                        name: term.name.clone(),
                        slug: slugify(&term.name),
                        synonyms: Vec::new(),
                    });
                    term_id
                },
            };
            if !ids.contains(&term_id) {
                ids.push(term_id);
            }
        }
        state.entity_mut(id)?.terms.insert(taxonomy.to_string(), ids.clone());
        Ok(ids)
    }

    fn list_by_kind(&self, kind: EntityKind) -> StoreResult<Vec<StoredEntity>> {
        let state = self.lock()?;
        Ok(state
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    fn list_terms(&self) -> StoreResult<Vec<Term>> {
        Ok(self.lock()?.terms.clone())
    }

    fn insert_term(&self, taxonomy: &str, name: &str, slug: &str) -> StoreResult<TermId> {
        let mut state = self.lock()?;
        if state.terms.iter().any(|t| t.taxonomy == taxonomy && t.slug == slug) {
            return Err(StoreError::Rejected(format!(
                "term '{}' already exists in '{}'",
                slug, taxonomy
            )));
        }
        state.mutations += 1;
        let id = state.next_id();
        state.terms.push(Term {
            id,
            taxonomy: taxonomy.to_string(),
            name: name.to_string(),
            slug: slug.to_string(),
            synonyms: Vec::new(),
        });
        Ok(id)
    }

    fn set_term_synonyms(&self, id: TermId, synonyms: &[String]) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let term = state
            .terms
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::Rejected(format!("term {} not found", id)))?;
        term.synonyms = synonyms.to_vec();
        Ok(())
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.lock()?.users.clone())
    }

    fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.login == login).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn insert_user(&self, user: &NewUser) -> StoreResult<UserId> {
        let mut state = self.lock()?;
        if state.users.iter().any(|u| u.login == user.login) {
            return Err(StoreError::DuplicateLogin(user.login.clone()));
        }
        state.mutations += 1;
        let id = state.next_id();
        state.users.push(User {
            id,
            login: user.login.clone(),
            email: user.email.clone(),
            display_name: if user.display_name.is_empty() {
                user.login.clone()
            } else {
                user.display_name.clone()
            },
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            roles: if user.roles.is_empty() {
                vec![Role::Subscriber]
            } else {
                user.roles.clone()
            },
            initials: Vec::new(),
            meta: BTreeMap::new(),
        });
        Ok(id)
    }

    fn update_user(&self, id: UserId, update: &UserUpdate) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let user = state.user_mut(id)?;
        if let Some(email) = &update.email {
            user.email = email.clone();
        }
        if let Some(first_name) = &update.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            user.last_name = Some(last_name.clone());
        }
        Ok(())
    }

    fn set_user_meta(&self, id: UserId, key: &str, value: &Value) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.user_mut(id)?.meta.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn set_user_initials(&self, id: UserId, initials: &[String]) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.user_mut(id)?.initials = initials.to_vec();
        Ok(())
    }

    fn upload_attachment(&self, upload: &AttachmentUpload) -> StoreResult<EntityId> {
        let mut state = self.lock()?;
        if state.entities.values().any(|e| e.guid == upload.guid) {
            return Err(StoreError::DuplicateGuid(upload.guid.to_string()));
        }
        state.mutations += 1;
        let id = state.next_id();
        state.entities.insert(
            id,
            StoredEntity {
                id,
                guid: upload.guid.clone(),
                kind: EntityKind::Attachment,
                title: upload.title.clone(),
                body: String::new(),
                excerpt: upload.caption.clone(),
                status: DocumentStatus::Publish,
                author: None,
                last_editor: None,
                published_at: None,
                comments_open: None,
                parent: upload.parent,
                thumbnail: None,
                meta: BTreeMap::new(),
                terms: BTreeMap::new(),
                raw: None,
                raw_fingerprint: None,
            },
        );
        state
            .attachment_urls
            .insert(id, format!("/uploads/{}", upload.target_name));
        drop(state);

        // the store owns the staged copy from here on
        match std::fs::remove_file(&upload.staged_path) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        Ok(id)
    }

    fn update_attachment_caption(&self, id: EntityId, caption: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.entity_mut(id)?.excerpt = caption.to_string();
        Ok(())
    }

    fn attachment_url(&self, id: EntityId) -> StoreResult<Option<String>> {
        Ok(self.lock()?.attachment_urls.get(&id).cloned())
    }

    fn set_thumbnail(&self, id: EntityId, attachment: EntityId) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.mutations += 1;
        state.entity_mut(id)?.thumbnail = Some(attachment);
        Ok(())
    }

    fn move_to_folder(&self, folder: &str, attachments: &[EntityId]) -> StoreResult<bool> {
        let mut state = self.lock()?;
        if !state.folders.contains_key(folder) {
            return Ok(false);
        }
        state.mutations += 1;
        for contents in state.folders.values_mut() {
            contents.retain(|id| !attachments.contains(id));
        }
        if let Some(contents) = state.folders.get_mut(folder) {
            contents.extend_from_slice(attachments);
        }
        Ok(true)
    }

    fn find_product_by_sku(&self, sku: &str) -> StoreResult<Option<Product>> {
        Ok(self.lock()?.products.iter().find(|p| p.sku == sku).cloned())
    }

    fn insert_product(&self, product: &Product) -> StoreResult<i64> {
        let mut state = self.lock()?;
        state.mutations += 1;
        let id = state.next_id();
        state.products.push(Product {
            id,
            ..product.clone()
        });
        Ok(id)
    }

    fn current_user(&self) -> StoreResult<Option<User>> {
        let state = self.lock()?;
        Ok(state
            .current_user
            .and_then(|id| state.users.iter().find(|u| u.id == id).cloned()))
    }
}
