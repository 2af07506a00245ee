use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "strudel-sync")]
#[command(about = "Strudel sync - talk to the live-coding agent from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a panel, send one chat message and print the agent's reply
    Chat {
        /// Panel to talk about, e.g. `clip:kick`
        #[arg(long)]
        panel: String,
        /// Seconds to wait for the reply to finish
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        message: String,
    },
    /// List recently closed panels
    Recent,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strudel=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            panel,
            timeout,
            message,
        } => commands::chat::run(&panel, &message, timeout).await?,
        Commands::Recent => commands::recent::run()?,
    }

    Ok(())
}
