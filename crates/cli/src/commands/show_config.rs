//! Effective configuration dump.

use anyhow::Result;
use clap::Args;

use super::load_config;

/// Arguments for the show-config command.
#[derive(Args, Debug, Clone)]
pub struct ShowConfigArgs {
    /// Config profile layered over Config.toml
    #[arg(long, env = "HEDGE_PROFILE")]
    pub profile: Option<String>,
}

/// Prints the merged configuration. Durations are in milliseconds.
///
/// # Errors
/// Returns an error if the configuration cannot be loaded or is invalid.
pub fn run_show_config(args: &ShowConfigArgs) -> Result<()> {
    let config = load_config(args.profile.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
