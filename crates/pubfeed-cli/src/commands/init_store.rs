//! `pubfeed init-store` command implementation

use crate::error::Result;
use crate::Cli;
use pubfeed_ingest::store::{SqliteStore, IMPORTER_LOGIN};

pub fn run(cli: &Cli) -> Result<()> {
    let db = cli.db_path();
    let store = SqliteStore::open(&db, &cli.uploads_dir())?;
    let id = store.bootstrap_importer()?;

    println!("Store ready at {}", db.display());
    println!("Importer account '{}' (id {})", IMPORTER_LOGIN, id);
    Ok(())
}
