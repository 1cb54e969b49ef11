//! notegraph CLI
//!
//! Command-line tools for notegraph journal directories.
//!
//! # Commands
//!
//! - `init` - Create a graph directory
//! - `inspect` - Display graph statistics and metadata
//! - `tree` - Print the note tree
//! - `add` - Create a note
//! - `check` - Run the consistency checker
//! - `dump-changes` - Dump change log entries for debugging
//! - `sync` - Sync with another graph directory

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// notegraph command-line maintenance tools.
#[derive(Parser)]
#[command(name = "notegraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the graph directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a graph directory
    Init {
        /// Instance id of the new replica (random if omitted)
        #[arg(short, long)]
        instance: Option<String>,
    },

    /// Display graph statistics and metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the note tree
    Tree {
        /// Note to start from
        #[arg(short, long, default_value = "root")]
        root: String,

        /// Maximum depth to print
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Create a note
    Add {
        /// Title of the new note
        title: String,

        /// Parent note id
        #[arg(long, default_value = "root")]
        parent: String,

        /// Text content
        #[arg(short, long)]
        content: Option<String>,
    },

    /// Run the consistency checker
    Check {
        /// Report problems without repairing them
        #[arg(long)]
        dry_run: bool,

        /// Create placeholder notes for branches whose note is missing
        #[arg(long)]
        placeholders: bool,
    },

    /// Dump change log entries for debugging
    DumpChanges {
        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start after this log position
        #[arg(short, long, default_value = "0")]
        after: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Sync with another graph directory
    Sync {
        /// Directory of the peer graph
        #[arg(long)]
        peer_dir: PathBuf,

        /// Entries per pull and push batch
        #[arg(long, default_value = "100")]
        batch_size: u32,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init { instance } => {
            let path = cli.path.ok_or("Graph path required for init")?;
            commands::init::run(&path, instance.as_deref())?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Graph path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Tree { root, depth } => {
            let path = cli.path.ok_or("Graph path required for tree")?;
            commands::tree::run(&path, &root, depth)?;
        }
        Commands::Add {
            title,
            parent,
            content,
        } => {
            let path = cli.path.ok_or("Graph path required for add")?;
            commands::add::run(&path, &parent, &title, content.as_deref())?;
        }
        Commands::Check {
            dry_run,
            placeholders,
        } => {
            let path = cli.path.ok_or("Graph path required for check")?;
            let clean = commands::check::run(&path, dry_run, placeholders)?;
            if !clean {
                std::process::exit(1);
            }
        }
        Commands::DumpChanges {
            limit,
            after,
            format,
        } => {
            let path = cli.path.ok_or("Graph path required for dump-changes")?;
            commands::dump_changes::run(&path, after, limit, &format)?;
        }
        Commands::Sync {
            peer_dir,
            batch_size,
        } => {
            let path = cli.path.ok_or("Graph path required for sync")?;
            commands::sync::run(&path, &peer_dir, batch_size)?;
        }
        Commands::Version => {
            println!("notegraph CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
