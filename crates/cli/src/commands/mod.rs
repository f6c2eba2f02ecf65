//! CLI commands for the spread hedge engine.

pub mod positions;
pub mod run;
pub mod show_config;
pub mod stats;

pub use positions::{run_positions, PositionsArgs};
pub use run::{run_engine, RunArgs};
pub use show_config::{run_show_config, ShowConfigArgs};
pub use stats::{run_stats, StatsArgs};

use anyhow::{Context, Result};
use spread_hedge_core::ConfigLoader;
use spread_hedge_engine::EngineConfig;

/// Loads `config/Config.toml`, an optional profile overlay, and `HEDGE_*`
/// environment overrides, then validates the result.
///
/// # Errors
/// Returns an error if a config file cannot be parsed or a value is invalid.
pub fn load_config(profile: Option<&str>) -> Result<EngineConfig> {
    let config: EngineConfig = match profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)
            .with_context(|| format!("failed to load config profile '{profile}'"))?,
        None => ConfigLoader::load().context("failed to load config")?,
    };
    config.validate()?;
    Ok(config)
}
