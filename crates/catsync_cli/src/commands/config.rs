//! Config command implementation.

use catsync_engine::MirrorConfig;

/// Runs the config command.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = MirrorConfig::from_env()?;
    println!("{config:#?}");
    Ok(())
}
