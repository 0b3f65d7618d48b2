//! Pubfeed CLI Library
//!
//! Command-line front end of the publisher content importer.
//!
//! - **Import**: run the configured imports (`pubfeed import`)
//! - **Configuration**: print the merged configuration (`pubfeed config`)
//! - **Store setup**: create the local store and importer account (`pubfeed init-store`)

pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use pubfeed_ingest::config::ConfigLoader;
use std::path::PathBuf;

/// Pubfeed - publisher content importer
#[derive(Parser, Debug)]
#[command(name = "pubfeed")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Importer configuration (JSON, keyed by publisher id)
    #[arg(long, env = "PUBFEED_CONFIG", default_value = "config/importer.json", global = true)]
    pub config: PathBuf,

    /// Site-local configuration merged on top of --config
    #[arg(long, env = "PUBFEED_SITE_CONFIG", global = true)]
    pub site_config: Option<PathBuf>,

    /// Directory relative configuration paths are resolved against
    #[arg(long, env = "PUBFEED_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// Store database (defaults to the user data directory)
    #[arg(long, env = "PUBFEED_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Login of the account to import as (defaults to the importer account)
    #[arg(long, env = "PUBFEED_USER", global = true)]
    pub user: Option<String>,
}

impl Cli {
    /// Store database path
    pub fn db_path(&self) -> PathBuf {
        match &self.db {
            Some(db) => db.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pubfeed")
                .join("pubfeed.db"),
        }
    }

    /// Uploaded attachments live next to the database
    pub fn uploads_dir(&self) -> PathBuf {
        let db = self.db_path();
        match db.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join("uploads"),
            _ => PathBuf::from("uploads"),
        }
    }

    pub fn config_loader(&self) -> ConfigLoader {
        let mut loader = ConfigLoader::new(&self.config);
        if let Some(site) = &self.site_config {
            loader = loader.site_override(site);
        }
        if let Some(root) = &self.root {
            loader = loader.root(root);
        }
        loader
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import records of the configured publishers
    Import {
        /// Only this publisher
        #[arg(short, long)]
        publisher: Option<String>,

        /// Only this record type
        #[arg(short = 't', long = "type")]
        record_type: Option<String>,

        /// Import a single file (requires exactly one matching type)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Override the import directory of the selected publisher(s)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Run against an empty in-memory store; nothing is persisted
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the merged, validated configuration
    Config,

    /// Create the store database and the importer account
    InitStore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_import_args() {
        let cli = Cli::try_parse_from([
            "pubfeed",
            "--db",
            "/var/lib/pubfeed/store.db",
            "import",
            "--publisher",
            "pz",
            "--type",
            "articles",
        ])
        .unwrap();

        match &cli.command {
            Commands::Import {
                publisher,
                record_type,
                dry_run,
                ..
            } => {
                assert_eq!(publisher.as_deref(), Some("pz"));
                assert_eq!(record_type.as_deref(), Some("articles"));
                assert!(!*dry_run);
            },
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.uploads_dir(), PathBuf::from("/var/lib/pubfeed/uploads"));
    }
}
