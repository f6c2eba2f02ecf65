use clap::{Parser, Subcommand};

mod commands;

use commands::{PositionsArgs, RunArgs, ShowConfigArgs, StatsArgs};

#[derive(Parser)]
#[command(name = "spread-hedge")]
#[command(about = "Two-venue spread hedge execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against two simulated venues
    Run(RunArgs),
    /// Print trade journal statistics
    Stats(StatsArgs),
    /// Print the persisted position snapshot and open journal entries
    Positions(PositionsArgs),
    /// Print the effective merged configuration as JSON
    ShowConfig(ShowConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run(args) => commands::run_engine(args).await?,
        Commands::Stats(args) => commands::run_stats(&args)?,
        Commands::Positions(args) => commands::run_positions(&args)?,
        Commands::ShowConfig(args) => commands::run_show_config(&args)?,
    }

    Ok(())
}
