//! Identity resolution and the import decision
//!
//! | pristine | raw differs | decision        |
//! |----------|-------------|-----------------|
//! | no       | any         | manually edited |
//! | yes      | no          | unchanged       |
//! | yes      | yes         | import          |

use crate::model::{Guid, UserId};
use crate::store::{ContentStore, StoreResult, StoredEntity};

/// Why a record is not imported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ManuallyEdited,
    Unchanged,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::ManuallyEdited => "manually edited",
            SkipReason::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Import,
    Skip(SkipReason),
}

pub struct IdentityResolver<'a> {
    store: &'a dyn ContentStore,
    importer: Option<UserId>,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn ContentStore, importer: Option<UserId>) -> Self {
        Self { store, importer }
    }

    pub fn resolve_existing(&self, guid: &Guid) -> StoreResult<Option<StoredEntity>> {
        self.store.find_by_guid(guid)
    }

    /// Never stored, or last edited by nobody or by the importer itself.
    pub fn is_pristine(&self, entity: Option<&StoredEntity>) -> bool {
        match entity.and_then(|e| e.last_editor) {
            None => true,
            Some(editor) => Some(editor) == self.importer,
        }
    }

    /// Whether `raw` differs from the stored snapshot, byte for byte
    pub fn is_raw_different(raw: &[u8], entity: Option<&StoredEntity>) -> bool {
        match entity.and_then(|e| e.raw.as_deref()) {
            Some(stored) => stored != raw,
            None => true,
        }
    }

    /// Decide whether a record is parsed and persisted. Record types that do
    /// not track manual edits are always pristine.
    pub fn decide(&self, raw: &[u8], entity: Option<&StoredEntity>, tracks_manual_edits: bool) -> Decision {
        if tracks_manual_edits && !self.is_pristine(entity) {
            Decision::Skip(SkipReason::ManuallyEdited)
        } else if !Self::is_raw_different(raw, entity) {
            Decision::Skip(SkipReason::Unchanged)
        } else {
            Decision::Import
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{DocumentStatus, EntityKind};
    use crate::store::{EntityDraft, MemoryStore};

    const IMPORTER: UserId = 1;
    const EDITOR: UserId = 2;

    fn stored(store: &MemoryStore, raw: &[u8]) -> StoredEntity {
        let guid = Guid::new("pz", "woodwing", "4711");
        let id = store
            .insert_entity(&EntityDraft {
                guid: guid.clone(),
                kind: EntityKind::Post,
                title: "T".into(),
                body: "B".into(),
                excerpt: String::new(),
                status: DocumentStatus::Publish,
                author: None,
                published_at: None,
                comments_open: None,
                parent: None,
            })
            .unwrap();
        store.set_raw(id, raw, "fp").unwrap();
        store.find_by_guid(&guid).unwrap().unwrap()
    }

    #[test]
    fn test_decision_table() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store, Some(IMPORTER));
        let entity = stored(&store, b"<a/>");

        assert_eq!(resolver.decide(b"<a/>", None, true), Decision::Import);
        assert_eq!(
            resolver.decide(b"<a/>", Some(&entity), true),
            Decision::Skip(SkipReason::Unchanged)
        );
        assert_eq!(resolver.decide(b"<b/>", Some(&entity), true), Decision::Import);

        store.record_manual_edit(entity.id, EDITOR).unwrap();
        let edited = store.get_entity(entity.id).unwrap().unwrap();
        assert_eq!(
            resolver.decide(b"<b/>", Some(&edited), true),
            Decision::Skip(SkipReason::ManuallyEdited)
        );
        // untracked types ignore edits
        assert_eq!(resolver.decide(b"<b/>", Some(&edited), false), Decision::Import);

        store.record_manual_edit(entity.id, IMPORTER).unwrap();
        let by_importer = store.get_entity(entity.id).unwrap().unwrap();
        assert!(resolver.is_pristine(Some(&by_importer)));
    }

    #[test]
    fn test_raw_difference_is_exact() {
        let store = MemoryStore::new();
        let entity = stored(&store, b"<a/>");
        assert!(!IdentityResolver::is_raw_different(b"<a/>", Some(&entity)));
        assert!(IdentityResolver::is_raw_different(b"<a/> ", Some(&entity)));
        assert!(IdentityResolver::is_raw_different(b"<a/>", None));

        store.delete_raw(entity.id).unwrap();
        let cleared = store.get_entity(entity.id).unwrap().unwrap();
        assert!(IdentityResolver::is_raw_different(b"<a/>", Some(&cleared)));
    }

    #[test]
    fn test_resolve_existing() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store, None);
        stored(&store, b"x");
        assert!(resolver
            .resolve_existing(&Guid::new("pz", "woodwing", "4711"))
            .unwrap()
            .is_some());
        assert!(resolver
            .resolve_existing(&Guid::new("pz", "woodwing", "4712"))
            .unwrap()
            .is_none());
    }
}
