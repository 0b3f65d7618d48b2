//! Import orchestration
//!
//! Drives one run: enumerate the inputs of every planned type, then per
//! record identify, resolve, decide, parse, merge and persist. A failing
//! record is reported and logged; the batch carries on. Types whose parser
//! reconciles cancel the subscriptions a complete pass did not see.

use crate::accounts::{AccountLinker, CUSTOMER_META};
use crate::attachments::AttachmentBinder;
use crate::error::{IngestError, RecordError, Result};
use crate::feed::FeedCursor;
use crate::identity::{Decision, IdentityResolver, SkipReason};
use crate::lookup::LookupCache;
use crate::model::{
    CanonicalDocument, DocumentMerge, DocumentStatus, EntityId, EntityKind, ExistingFields, Guid, TermRef,
    FREE_TAGGING_TAXONOMIES,
};
use crate::parser::{Identification, ParseContext, ParseOutcome, RawRecord, SourceParser};
use crate::plan::{ImportPlan, PlannedType, RecordSource};
use crate::report::{ImportReport, Reconciliation, RecordOutcome, RecordReport, TypeReport};
use crate::store::{ContentStore, EntityDraft, StoreResult, StoredEntity};
use pubfeed_common::checksum::fingerprint;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, info_span, warn};
use walkdir::WalkDir;

/// What happened to a record that got past identification
enum Processed {
    Skipped(SkipReason),
    ParserSkip(String),
    Persisted { entity_id: EntityId, created: bool },
}

/// State of one publisher/type pass
struct TypeRun<'r> {
    ctx: ParseContext<'r>,
    resolver: IdentityResolver<'r>,
    /// External ids seen in this pass
    seen: BTreeSet<String>,
    /// Every input was read completely
    complete: bool,
    report: TypeReport,
}

fn draft_of(doc: &CanonicalDocument) -> EntityDraft {
    EntityDraft {
        guid: doc.guid.clone(),
        kind: doc.kind,
        title: doc.title.clone(),
        body: doc.body.clone(),
        excerpt: doc.excerpt.clone(),
        status: doc.status,
        author: doc.author.map(|a| a.user_id),
        published_at: doc.published_at,
        comments_open: doc.comments_open,
        parent: None,
    }
}

pub struct ImportOrchestrator<'a> {
    store: &'a dyn ContentStore,
    staging_dir: Option<PathBuf>,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self {
            store,
            staging_dir: None,
        }
    }

    /// Directory media uploads are staged in; the system temp dir by default
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Only administrators may import.
    fn check_acting_user(&self) -> Result<()> {
        match self.store.current_user()? {
            Some(user) if user.is_admin() => Ok(()),
            Some(user) => Err(IngestError::Precondition(format!(
                "user '{}' is not an administrator",
                user.login
            ))),
            None => Err(IngestError::Precondition("no acting user".to_string())),
        }
    }

    pub fn run(&self, plan: &ImportPlan<'_>) -> Result<ImportReport> {
        self.check_acting_user()?;
        let lookups = LookupCache::build(self.store, plan.skus())?;

        let mut report = ImportReport::default();
        for planned in &plan.types {
            report.types.push(self.run_type(planned, &lookups));
        }

        info!(
            records = report.total(),
            processed = report.count(RecordOutcome::Processed),
            failed = report.count(RecordOutcome::Failed),
            "Import finished"
        );
        Ok(report)
    }

    fn run_type(&self, planned: &PlannedType<'_>, lookups: &LookupCache) -> TypeReport {
        let span = info_span!(
            "import",
            publisher = %planned.publisher.id,
            record_type = planned.record_type
        );
        let _enter = span.enter();

        let mut run = TypeRun {
            ctx: ParseContext::new(planned.publisher, planned.record_type, planned.type_config, lookups),
            resolver: IdentityResolver::new(self.store, lookups.importer()),
            seen: BTreeSet::new(),
            complete: true,
            report: TypeReport::new(&planned.publisher.id, planned.record_type),
        };

        let inputs = Self::enumerate(planned, &mut run);
        info!(inputs = inputs.len(), parser = %planned.parser.kind(), "Importing");
        for path in inputs {
            if planned.parser.kind().is_feed() {
                self.import_feed(planned, &mut run, &path);
            } else {
                self.import_file(planned, &mut run, &path);
            }
        }

        if planned.parser.reconciles() {
            let reconciliation = self.reconcile(planned, &run);
            run.report.reconciliation = Some(reconciliation);
        }
        run.report
    }

    /// Input files of a type, sorted
    fn enumerate(planned: &PlannedType<'_>, run: &mut TypeRun<'_>) -> Vec<PathBuf> {
        let (path, recursive) = match &planned.source {
            RecordSource::File(path) => return vec![path.clone()],
            RecordSource::Directory { path, recursive } => (path, *recursive),
        };

        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 });
        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() && planned.accepts(entry.path()) => {
                    files.push(entry.into_path());
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(error = %e, "Failed to read import directory entry");
                    run.complete = false;
                },
            }
        }
        files.sort();
        files
    }

    fn import_file(&self, planned: &PlannedType<'_>, run: &mut TypeRun<'_>, path: &Path) {
        match std::fs::read(path) {
            Ok(bytes) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let record = RawRecord::new(bytes, stem).with_path(path.to_path_buf());
                self.import_record(planned, run, record);
            },
            Err(e) => Self::fail_input(run, path, e.to_string()),
        }
    }

    fn fail_input(run: &mut TypeRun<'_>, path: &Path, message: String) {
        error!(path = %path.display(), error = %message, "Failed to read input");
        run.complete = false;
        run.report
            .records
            .push(RecordReport::new(Some(path.to_path_buf()), RecordOutcome::Failed).with_message(message));
    }

    fn import_feed(&self, planned: &PlannedType<'_>, run: &mut TypeRun<'_>, path: &Path) {
        let Some(format) = planned.feed_format(path) else {
            Self::fail_input(run, path, "unknown feed format".to_string());
            return;
        };
        let cursor = match FeedCursor::open(path, format) {
            Ok(cursor) => cursor,
            Err(e) => {
                Self::fail_input(run, path, e.to_string());
                return;
            },
        };

        for record in cursor {
            match record {
                Ok(record) => self.import_record(planned, run, record),
                Err(e) => Self::fail_input(run, path, e.to_string()),
            }
        }
    }

    fn import_record(&self, planned: &PlannedType<'_>, run: &mut TypeRun<'_>, record: RawRecord) {
        let parser = &planned.parser;
        let record = RawRecord {
            bytes: parser.prepare_raw(record.bytes),
            ..record
        };
        let mut report = RecordReport::new(record.path.clone(), RecordOutcome::Failed);
        let source = record
            .path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let external_id = match parser.identify(&record, &run.ctx) {
            Ok(Identification::Record(id)) => id,
            Ok(Identification::Skip(reason)) => {
                debug!(source = %source, reason = %reason, "Skipped record");
                report.outcome = RecordOutcome::Skipped;
                run.report.records.push(report.with_message(reason));
                return;
            },
            Err(e) => {
                error!(source = %source, error = %e, "Failed to identify record");
                run.report.records.push(report.with_message(e.to_string()));
                return;
            },
        };
        run.seen.insert(external_id.clone());
        let guid = run.ctx.guid(&external_id);
        report.external_id = Some(external_id.clone());
        report.guid = Some(guid.clone());

        match self.process(planned, run, &record, &guid) {
            Ok(Processed::Skipped(reason)) => {
                debug!(external_id = %external_id, reason = reason.as_str(), "Skipped record");
                report.outcome = match reason {
                    SkipReason::Unchanged => RecordOutcome::Unchanged,
                    SkipReason::ManuallyEdited => RecordOutcome::ManuallyEdited,
                };
            },
            Ok(Processed::ParserSkip(reason)) => {
                warn!(external_id = %external_id, reason = %reason, "Record not imported");
                report.outcome = RecordOutcome::Skipped;
                report.message = Some(reason);
            },
            Ok(Processed::Persisted { entity_id, created }) => {
                let outcome = if created { "created" } else { "updated" };
                info!(external_id = %external_id, guid = %guid, entity_id, outcome, "Imported record");
                report.outcome = RecordOutcome::Processed;
                report.entity_id = Some(entity_id);
                report.created = created;
            },
            Err(RecordError::DuplicateLogin(login)) => {
                report.outcome = RecordOutcome::Skipped;
                report.message = Some(RecordError::DuplicateLogin(login).to_string());
            },
            Err(e) => {
                error!(external_id = %external_id, guid = %guid, error = %e, "Failed to import record");
                report.message = Some(e.to_string());
            },
        }
        run.report.records.push(report);
    }

    fn process(
        &self,
        planned: &PlannedType<'_>,
        run: &TypeRun<'_>,
        record: &RawRecord,
        guid: &Guid,
    ) -> std::result::Result<Processed, RecordError> {
        let existing = run.resolver.resolve_existing(guid)?;
        let decision = run
            .resolver
            .decide(&record.bytes, existing.as_ref(), planned.parser.tracks_manual_edits());
        if let Decision::Skip(reason) = decision {
            return Ok(Processed::Skipped(reason));
        }

        let ctx = run.ctx.with_existing_author(existing.as_ref().and_then(|e| e.author));
        let doc = match planned.parser.parse(record, &ctx)? {
            ParseOutcome::Document(doc) => *doc,
            ParseOutcome::Skip(reason) => return Ok(Processed::ParserSkip(reason)),
        };
        let doc = match &existing {
            Some(entity) => DocumentMerge::apply(
                doc,
                &ExistingFields {
                    entity_id: Some(entity.id),
                    author: entity.author,
                    published_at: entity.published_at,
                    comments_open: entity.comments_open,
                },
            ),
            None => doc,
        };

        let (entity_id, created) = self.persist(planned, doc, existing.as_ref())?;
        Ok(Processed::Persisted { entity_id, created })
    }

    fn persist(
        &self,
        planned: &PlannedType<'_>,
        mut doc: CanonicalDocument,
        existing: Option<&StoredEntity>,
    ) -> std::result::Result<(EntityId, bool), RecordError> {
        let raw_fingerprint = fingerprint(&doc.raw);

        if let Some(account) = &doc.subscriber {
            let link = AccountLinker::new(self.store).link(account, existing, &raw_fingerprint)?;
            doc.set_meta(CUSTOMER_META, link.user_id);
        }
        if let Some(entity) = existing {
            if entity.kind == EntityKind::Subscription && entity.status == DocumentStatus::Cancelled {
                info!(external_id = %doc.external_id, entity_id = entity.id, "Reactivating subscription");
            }
        }

        let mut draft = draft_of(&doc);
        let (id, created) = match existing {
            Some(entity) => {
                self.store.update_entity(entity.id, &draft)?;
                (entity.id, false)
            },
            None => (self.store.insert_entity(&draft)?, true),
        };

        for (taxonomy, terms) in doc.taxonomies.iter() {
            let free_tagging = FREE_TAGGING_TAXONOMIES.contains(&taxonomy);
            let terms: Vec<TermRef> = terms
                .into_iter()
                .filter(|t| t.id.is_some() || free_tagging)
                .cloned()
                .collect();
            self.store.set_terms(id, taxonomy, &terms)?;
        }

        let mut binder = AttachmentBinder::new(self.store, planned.publisher, planned.type_config);
        if let Some(dir) = &self.staging_dir {
            binder = binder.staging_dir(dir);
        }
        let report = binder.bind(&mut doc, id)?;
        if !report.missing.is_empty() {
            warn!(external_id = %doc.external_id, missing = ?report.missing, "Media files missing");
        }
        if doc.body != draft.body {
            draft.body = doc.body.clone();
            self.store.update_entity(id, &draft)?;
        }

        for (key, value) in &doc.meta {
            self.store.set_meta(id, key, value)?;
        }
        self.store.set_raw(id, &doc.raw, &raw_fingerprint)?;
        Ok((id, created))
    }

    /// Cancel the subscriptions of this publisher a complete pass did not see.
    fn reconcile(&self, planned: &PlannedType<'_>, run: &TypeRun<'_>) -> Reconciliation {
        if !run.complete {
            warn!("Inputs were not read completely; skipping reconciliation");
            return Reconciliation::Skipped {
                reason: "incomplete pass".to_string(),
            };
        }
        if run.seen.is_empty() {
            return Reconciliation::Skipped {
                reason: "no records seen".to_string(),
            };
        }

        match self.cancel_unseen(planned, run) {
            Ok(reconciliation) => reconciliation,
            Err(e) => {
                error!(error = %e, "Reconciliation failed");
                Reconciliation::Failed { error: e.to_string() }
            },
        }
    }

    fn cancel_unseen(&self, planned: &PlannedType<'_>, run: &TypeRun<'_>) -> StoreResult<Reconciliation> {
        let candidates: Vec<StoredEntity> = self
            .store
            .list_by_kind(EntityKind::Subscription)?
            .into_iter()
            .filter(|e| e.status != DocumentStatus::Cancelled)
            .filter(|e| e.meta_str("_publisher") == Some(planned.publisher.id.as_str()))
            .filter(|e| e.meta_str("_importer_id").is_some_and(|id| !run.seen.contains(id)))
            .collect();
        let ids: Vec<String> = candidates
            .iter()
            .filter_map(|e| e.meta_str("_importer_id").map(str::to_string))
            .collect();

        let ceiling = planned.type_config.reconcile_ceiling;
        if candidates.len() > ceiling {
            error!(
                count = candidates.len(),
                ceiling,
                candidates = %ids.join("\n  "),
                "Would cancel more subscriptions than allowed; verify the feed. No subscriptions were cancelled."
            );
            return Ok(Reconciliation::Aborted { ceiling, candidates: ids });
        }

        for (entity, id) in candidates.iter().zip(&ids) {
            self.store.set_status(entity.id, DocumentStatus::Cancelled)?;
            // re-imported should it reappear
            self.store.delete_raw(entity.id)?;
            info!(external_id = %id, entity_id = entity.id, "Cancelled subscription");
        }
        Ok(Reconciliation::Completed { cancelled: ids })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ImporterConfig;
    use crate::store::{MemoryStore, NewUser, Role};
    use serde_json::json;

    #[test]
    fn test_non_admin_cannot_import() {
        let store = MemoryStore::new();
        let config = ImporterConfig::from_value(json!({}), Path::new("/")).unwrap();
        let plan = ImportPlan::builder(&config).build().unwrap();

        let err = ImportOrchestrator::new(&store).run(&plan).unwrap_err();
        assert!(matches!(err, IngestError::Precondition(_)));

        let id = store
            .insert_user(&NewUser {
                login: "redaktion".into(),
                roles: vec![Role::Editor],
                ..Default::default()
            })
            .unwrap();
        store.set_current_user(id).unwrap();
        let err = ImportOrchestrator::new(&store).run(&plan).unwrap_err();
        assert!(err.to_string().contains("redaktion"));
    }

    #[test]
    fn test_empty_plan_runs() {
        let store = MemoryStore::new();
        let id = store
            .insert_user(&NewUser {
                login: "system".into(),
                roles: vec![Role::Administrator],
                ..Default::default()
            })
            .unwrap();
        store.set_current_user(id).unwrap();
        let config = ImporterConfig::from_value(json!({}), Path::new("/")).unwrap();
        let plan = ImportPlan::builder(&config).build().unwrap();

        let report = ImportOrchestrator::new(&store).run(&plan).unwrap();
        assert_eq!(report.total(), 0);
        assert!(!report.has_failures());
    }
}
