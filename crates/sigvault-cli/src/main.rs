//! sigvault — read encrypted Signal Android backups.
//!
//! Every command opens a backup file with the 30-digit passphrase and
//! works on the decrypted contents: listing threads and messages,
//! extracting attachments, avatars and stickers, or exporting the
//! reconstructed SQLite database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod mime;

/// Read encrypted Signal Android backups.
#[derive(Parser)]
#[command(name = "sigvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export attachments to a directory
    Attachments {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,

        /// Only export attachments of this thread
        #[arg(short = 't', long)]
        thread: Option<i64>,

        /// Output directory
        #[arg(short = 'd', long, default_value = ".")]
        outdir: PathBuf,
    },

    /// Export avatars to a directory
    Avatars {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,

        /// Output directory
        #[arg(short = 'd', long, default_value = ".")]
        outdir: PathBuf,
    },

    /// Export stickers to a directory
    Stickers {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,

        /// Output directory
        #[arg(short = 'd', long, default_value = ".")]
        outdir: PathBuf,
    },

    /// Verify every frame and file payload in the backup
    Check {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,
    },

    /// Dump the decrypted frame stream
    Dump {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,
    },

    /// Print message history
    Messages {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,

        /// Only print messages of this thread
        #[arg(short = 't', long)]
        thread: Option<i64>,
    },

    /// Export the decrypted SQLite database
    Sqlite {
        /// Backup file
        backup: PathBuf,

        /// Output database file
        output: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,
    },

    /// List conversation threads
    Threads {
        /// Backup file
        backup: PathBuf,

        /// Read the passphrase from a file instead of prompting
        #[arg(short = 'p', long)]
        passfile: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Attachments {
            backup,
            passfile,
            thread,
            outdir,
        } => commands::attachments(&backup, passfile.as_deref(), thread, &outdir),
        Commands::Avatars {
            backup,
            passfile,
            outdir,
        } => commands::avatars(&backup, passfile.as_deref(), &outdir),
        Commands::Stickers {
            backup,
            passfile,
            outdir,
        } => commands::stickers(&backup, passfile.as_deref(), &outdir),
        Commands::Check { backup, passfile } => commands::check(&backup, passfile.as_deref()),
        Commands::Dump { backup, passfile } => commands::dump(&backup, passfile.as_deref()),
        Commands::Messages {
            backup,
            passfile,
            thread,
        } => commands::messages(&backup, passfile.as_deref(), thread),
        Commands::Sqlite {
            backup,
            output,
            passfile,
        } => commands::sqlite(&backup, passfile.as_deref(), &output),
        Commands::Threads { backup, passfile } => commands::threads(&backup, passfile.as_deref()),
    }
}
