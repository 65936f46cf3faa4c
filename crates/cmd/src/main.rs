// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::{commit_command, prepare_command, rollback_command, run_command, status_command};
use cmd::common::{ConfigArgs, ExportContext};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "bqexport")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Show staged blob names in status output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the staging bucket and a fresh destination table or partition
    Prepare {
        #[command(flatten)]
        config: ConfigArgs,
        /// BigQuery JSON schema file
        #[arg(short, long)]
        schema: PathBuf,
    },
    /// Load all staged blobs into the destination, then delete them
    Commit {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Drop the destination and delete all staged blobs
    Rollback {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Show the table and staging folder as they are now
    Status {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Prepare, stage records with parallel tasks, then commit or roll back
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// BigQuery JSON schema file
        #[arg(short, long)]
        schema: PathBuf,
        /// Newline-delimited JSON records, `-` for stdin
        #[arg(short, long)]
        input: PathBuf,
        /// Number of parallel tasks
        #[arg(short, long, default_value_t = 4)]
        tasks: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Prepare { config, schema } => {
            prepare_command(&ExportContext::from_args(config)?, schema).await
        }
        Commands::Commit { config } => commit_command(&ExportContext::from_args(config)?).await,
        Commands::Rollback { config } => rollback_command(&ExportContext::from_args(config)?).await,
        Commands::Status { config } => status_command(&ExportContext::from_args(config)?, cli.verbose).await,
        Commands::Run {
            config,
            schema,
            input,
            tasks,
        } => run_command(&ExportContext::from_args(config)?, schema, input, *tasks).await,
    }
}
