//! `pubfeed config` command implementation

use crate::error::Result;
use crate::Cli;

/// Print the merged configuration as JSON
pub fn run(cli: &Cli) -> Result<()> {
    let config = cli.config_loader().load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
