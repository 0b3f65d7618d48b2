//! End-to-end import of legacy Dialog exports into a memory store
//!
//! Covers the full record pipeline: enumeration, identification, parsing,
//! persistence, media binding, and the idempotence and manual-edit rules of
//! repeated runs.

use pubfeed_ingest::config::ConfigLoader;
use pubfeed_ingest::model::{DocumentStatus, EntityKind, Guid};
use pubfeed_ingest::plan::ImportPlan;
use pubfeed_ingest::store::{ContentStore, MemoryStore, NewUser, Role, IMPORTER_LOGIN};
use pubfeed_ingest::{ImportOrchestrator, ImportReport, RecordOutcome};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STORY_GUID: &str = "nn/dialog/12_0007_3301_Muller_Strasse_Umbau";
const GALLERY_GUID: &str = "nn/dialog/12_0012_3302_Fest";

struct Site {
    dir: TempDir,
    store: MemoryStore,
    editor: i64,
}

impl Site {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let stories = dir.path().join("stories");
        let media = dir.path().join("media");
        fs::create_dir_all(&stories).unwrap();
        fs::create_dir_all(&media).unwrap();

        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/dialog");
        for name in ["3301.xml", "3302.xml", "notes.txt"] {
            fs::copy(fixtures.join(name), stories.join(name)).unwrap();
        }
        for name in ["markt.jpg", "fest-1.jpg", "fest-2.jpg"] {
            fs::write(media.join(name), format!("jpeg bytes of {}", name)).unwrap();
        }

        fs::write(
            dir.path().join("importer.json"),
            serde_json::to_string_pretty(&json!({
                "nn": {
                    "system": "dialog",
                    "uploadsPrefix": "nn-",
                    "defaultAuthor": "redaktion",
                    "types": {
                        "articles": {
                            "parser": "legacy-dialog",
                            "directory": "stories",
                            "media": "media"
                        }
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let store = MemoryStore::new();
        let importer = store
            .insert_user(&NewUser {
                login: IMPORTER_LOGIN.into(),
                roles: vec![Role::Administrator],
                ..Default::default()
            })
            .unwrap();
        store.set_current_user(importer).unwrap();
        store
            .insert_user(&NewUser {
                login: "jdoe".into(),
                email: "jdoe@example.org".into(),
                display_name: "Jane Doe".into(),
                roles: vec![Role::Author],
                ..Default::default()
            })
            .unwrap();
        let editor = store
            .insert_user(&NewUser {
                login: "redaktion".into(),
                email: "redaktion@example.org".into(),
                display_name: "Redaktion".into(),
                roles: vec![Role::Editor],
                ..Default::default()
            })
            .unwrap();
        store.insert_term("category", "Lokales", "lokales").unwrap();
        store.insert_term("category", "News", "news").unwrap();

        Self { dir, store, editor }
    }

    fn story_path(&self) -> PathBuf {
        self.dir.path().join("stories/3301.xml")
    }

    fn import(&self) -> ImportReport {
        let config = ConfigLoader::new(self.dir.path().join("importer.json")).load().unwrap();
        let plan = ImportPlan::builder(&config).build().unwrap();
        ImportOrchestrator::new(&self.store)
            .staging_dir(self.dir.path())
            .run(&plan)
            .unwrap()
    }

    fn entity(&self, guid: &str) -> pubfeed_ingest::store::StoredEntity {
        self.store.find_by_guid(&Guid::from(guid.to_string())).unwrap().unwrap()
    }
}

fn outcome_of(report: &ImportReport, guid: &str) -> RecordOutcome {
    report
        .records()
        .find(|r| r.guid.as_ref().map(Guid::as_str) == Some(guid))
        .map(|r| r.outcome)
        .unwrap()
}

#[test]
fn test_first_run_imports_story_and_gallery() {
    let site = Site::new();
    let report = site.import();

    assert_eq!(report.total(), 2);
    assert_eq!(report.count(RecordOutcome::Processed), 2);
    assert!(report.records().all(|r| r.created));
    assert!(!report.has_failures());
    assert_eq!(report.summary(), vec!["nn/articles: 2 processed"]);

    let story = site.entity(STORY_GUID);
    assert_eq!(story.kind, EntityKind::Post);
    assert_eq!(story.title, "Breaking News Today");
    assert_eq!(story.excerpt, "Kurz gesagt.");
    assert_eq!(story.status, DocumentStatus::Publish);
    assert_eq!(story.meta_str("author"), Some("Jane Doe"));
    assert_eq!(story.meta_str("_importer_id"), Some("12_0007_3301_Muller_Strasse_Umbau"));
    assert_eq!(story.comments_open, Some(false));
    assert!(story.raw_fingerprint.is_some());

    // the first image is the thumbnail, plan.jpg is missing and stays a placeholder
    assert!(story.thumbnail.is_some());
    assert!(!story.body.contains("markt.jpg"));
    assert!(story.body.contains("<!-- plan.jpg -->"));
    assert!(story.body.contains("<h3>Neue Pläne</h3>"));
    assert_eq!(story.terms["category"].len(), 1);

    let gallery = site.entity(GALLERY_GUID);
    assert_eq!(gallery.kind, EntityKind::Gallery);
    assert_eq!(gallery.title, "Bilder vom Fest");
    let images = gallery.meta["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(gallery.thumbnail, images[0].as_i64());
    assert!(!gallery.body.contains("fest-"));
}

#[test]
fn test_second_run_changes_nothing() {
    let site = Site::new();
    site.import();
    let mutations = site.store.mutation_count();

    let report = site.import();
    assert_eq!(report.count(RecordOutcome::Unchanged), 2);
    assert_eq!(site.store.mutation_count(), mutations);
    assert_eq!(report.summary(), vec!["nn/articles: 2 unchanged"]);
}

#[test]
fn test_changed_export_updates_entity() {
    let site = Site::new();
    site.import();
    let id = site.entity(STORY_GUID).id;

    let xml = fs::read_to_string(site.story_path()).unwrap();
    fs::write(site.story_path(), xml.replace("Kurz gesagt.", "Jetzt ausführlicher.")).unwrap();

    let report = site.import();
    assert_eq!(outcome_of(&report, STORY_GUID), RecordOutcome::Processed);
    assert_eq!(outcome_of(&report, GALLERY_GUID), RecordOutcome::Unchanged);
    let record = report.records().find(|r| r.outcome == RecordOutcome::Processed).unwrap();
    assert!(!record.created);
    assert_eq!(record.entity_id, Some(id));

    let story = site.entity(STORY_GUID);
    assert_eq!(story.id, id);
    assert_eq!(story.excerpt, "Jetzt ausführlicher.");
}

#[test]
fn test_manual_edit_is_preserved() {
    let site = Site::new();
    site.import();
    let story = site.entity(STORY_GUID);
    site.store.record_manual_edit(story.id, site.editor).unwrap();

    let xml = fs::read_to_string(site.story_path()).unwrap();
    fs::write(site.story_path(), xml.replace("Breaking ", "Ganz neu: ")).unwrap();

    let report = site.import();
    assert_eq!(outcome_of(&report, STORY_GUID), RecordOutcome::ManuallyEdited);
    assert_eq!(site.entity(STORY_GUID).title, "Breaking News Today");
}

#[test]
fn test_single_file_run() {
    let site = Site::new();
    let config = ConfigLoader::new(site.dir.path().join("importer.json")).load().unwrap();
    let plan = ImportPlan::builder(&config)
        .publisher(Some("nn"))
        .file(Some(site.story_path()))
        .build()
        .unwrap();

    let report = ImportOrchestrator::new(&site.store).run(&plan).unwrap();
    assert_eq!(report.total(), 1);
    assert_eq!(outcome_of(&report, STORY_GUID), RecordOutcome::Processed);
    assert!(site.store.find_by_guid(&Guid::from(GALLERY_GUID.to_string())).unwrap().is_none());
}

#[test]
fn test_broken_export_fails_alone() {
    let site = Site::new();
    fs::write(site.dir.path().join("stories/3303.xml"), "<DialogExport><WebStory></Broken></DialogExport>").unwrap();

    let report = site.import();
    assert_eq!(report.total(), 3);
    assert_eq!(report.count(RecordOutcome::Processed), 2);
    assert!(report.has_failures());
    let failed = report.records().find(|r| r.outcome == RecordOutcome::Failed).unwrap();
    assert!(failed.source.as_ref().unwrap().ends_with("3303.xml"));
    assert!(failed.message.is_some());
}
