//! PageKeep store maintenance CLI

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagestore::FileStore;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store directory
    #[arg(short, long, default_value = "./data")]
    data: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored pages, most recently active first
    List,

    /// Print one page's stored state
    Show {
        /// Page tag
        tag: String,
    },

    /// Delete one page's stored state
    Delete {
        /// Page tag
        tag: String,
    },

    /// Delete every stored page
    Purge,

    /// Rewrite the store file without dead records
    Compact,

    /// Print record count and file usage
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    debug!("Opening store at {}", args.data);

    let store = FileStore::open(&args.data)
        .with_context(|| format!("Failed to open store at {}", args.data))?;

    let output = match &args.command {
        Command::List => commands::list(&store)?,
        Command::Show { tag } => commands::show(&store, tag)?,
        Command::Delete { tag } => commands::delete(&store, tag)?,
        Command::Purge => commands::purge(&store)?,
        Command::Compact => commands::compact(&store)?,
        Command::Stats => commands::stats(&store)?,
    };
    print!("{}", output);

    Ok(())
}
