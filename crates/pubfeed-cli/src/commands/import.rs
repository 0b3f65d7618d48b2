//! `pubfeed import` command implementation

use crate::error::{CliError, Result};
use crate::Cli;
use pubfeed_ingest::plan::ImportPlan;
use pubfeed_ingest::store::{ContentStore, MemoryStore, NewUser, Role, SqliteStore, IMPORTER_LOGIN};
use pubfeed_ingest::{ImportOrchestrator, ImportReport, RecordOutcome};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub publisher: Option<String>,
    pub record_type: Option<String>,
    pub file: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub dry_run: bool,
}

pub fn run(cli: &Cli, options: ImportOptions) -> Result<()> {
    let mut loader = cli.config_loader();
    if let Some(dir) = &options.dir {
        loader = loader.override_directory(options.publisher.clone(), dir);
    }
    let config = loader.load()?;

    let plan = ImportPlan::builder(&config)
        .publisher(options.publisher.as_deref())
        .record_type(options.record_type.as_deref())
        .file(options.file.as_deref())
        .build()?;

    let report = if options.dry_run {
        info!("Dry run against an in-memory store");
        let store = MemoryStore::new();
        let id = store.insert_user(&NewUser {
            login: IMPORTER_LOGIN.to_string(),
            display_name: "Importer".to_string(),
            roles: vec![Role::Administrator],
            ..Default::default()
        })?;
        store.set_current_user(id)?;
        ImportOrchestrator::new(&store).run(&plan)?
    } else {
        let store = SqliteStore::open(&cli.db_path(), &cli.uploads_dir())?;
        match &cli.user {
            Some(login) => {
                let user = store
                    .find_user_by_login(login)?
                    .ok_or_else(|| CliError::UnknownUser(login.clone()))?;
                store.set_current_user(user.id)?;
            },
            None => {
                store.bootstrap_importer()?;
            },
        }
        ImportOrchestrator::new(&store).run(&plan)?
    };

    print_report(&report);

    if report.has_failures() {
        return Err(CliError::ImportFailed(report.count(RecordOutcome::Failed)));
    }
    Ok(())
}

fn print_report(report: &ImportReport) {
    for record in report.records().filter(|r| r.outcome == RecordOutcome::Failed) {
        let source = record
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let id = record.external_id.as_deref().unwrap_or("-");
        eprintln!(
            "failed: {} [{}]: {}",
            source,
            id,
            record.message.as_deref().unwrap_or("unknown error")
        );
    }

    for line in report.summary() {
        println!("{}", line);
    }
}
