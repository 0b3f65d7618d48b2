//! Imports against the SQLite store, across reopened connections

use pubfeed_ingest::config::ConfigLoader;
use pubfeed_ingest::model::{DocumentStatus, Guid};
use pubfeed_ingest::plan::ImportPlan;
use pubfeed_ingest::store::{ContentStore, SqliteStore, IMPORTER_LOGIN};
use pubfeed_ingest::{ImportOrchestrator, ImportReport, RecordOutcome};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn site() -> TempDir {
    let dir = TempDir::new().unwrap();
    let stories = dir.path().join("stories");
    let media = dir.path().join("media");
    fs::create_dir_all(&stories).unwrap();
    fs::create_dir_all(&media).unwrap();

    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/dialog");
    fs::copy(fixtures.join("3301.xml"), stories.join("3301.xml")).unwrap();
    fs::write(media.join("markt.jpg"), b"jpeg").unwrap();
    fs::write(
        dir.path().join("importer.json"),
        json!({
            "nn": {
                "system": "dialog",
                "uploadsPrefix": "nn-",
                "types": {
                    "articles": {"parser": "legacy-dialog", "directory": "stories", "media": "media"}
                }
            }
        })
        .to_string(),
    )
    .unwrap();
    dir
}

fn import(dir: &Path) -> ImportReport {
    let store = SqliteStore::open(&dir.join("data/pubfeed.db"), &dir.join("data/uploads")).unwrap();
    store.bootstrap_importer().unwrap();

    let config = ConfigLoader::new(dir.join("importer.json")).load().unwrap();
    let plan = ImportPlan::builder(&config).build().unwrap();
    ImportOrchestrator::new(&store)
        .staging_dir(dir)
        .run(&plan)
        .unwrap()
}

#[test]
fn test_import_persists_across_connections() {
    let dir = site();

    let report = import(dir.path());
    assert_eq!(report.count(RecordOutcome::Processed), 1);
    assert!(dir.path().join("data/uploads/nn-markt.jpg").is_file());

    let report = import(dir.path());
    assert_eq!(report.count(RecordOutcome::Unchanged), 1);

    let store = SqliteStore::open(&dir.path().join("data/pubfeed.db"), &dir.path().join("data/uploads")).unwrap();
    let story = store
        .find_by_guid(&Guid::from("nn/dialog/12_0007_3301_Muller_Strasse_Umbau".to_string()))
        .unwrap()
        .unwrap();
    assert_eq!(story.title, "Breaking News Today");
    assert_eq!(story.status, DocumentStatus::Publish);
    assert!(story.thumbnail.is_some());
    assert_eq!(story.meta_str("_publisher"), Some("nn"));
    assert!(story.raw.is_some());
}

#[test]
fn test_bootstrap_importer_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open_in_memory(&dir.path().join("uploads")).unwrap();

    let first = store.bootstrap_importer().unwrap();
    let second = store.bootstrap_importer().unwrap();
    assert_eq!(first, second);

    let user = store.current_user().unwrap().unwrap();
    assert_eq!(user.login, IMPORTER_LOGIN);
    assert!(user.is_admin());
}
