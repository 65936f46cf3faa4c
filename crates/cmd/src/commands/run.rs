// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Run command - a whole export in one process
//!
//! Reads newline-delimited JSON records, splits them across parallel task
//! attempts that each stage one blob, then commits, or rolls back if any
//! task failed.
//!
//! Example:
//!   bqexport run --config export.yaml --schema schema.json --input rows.ndjson --tasks 8

use std::io::Read;
use std::path::Path;

use crate::common::{ExportContext, load_schema};
use anyhow::{Context, Result, anyhow};
use bqexport::{LocalJob, StagedExport};
use diagnostics::*;
use serde_json::Value;

#[allow(clippy::print_stdout)]
pub async fn run_command(ctx: &ExportContext, schema_path: &Path, input: &Path, tasks: usize) -> Result<()> {
    let schema = load_schema(schema_path)?;
    let records = read_records(input)?;
    let count = records.len();
    info!("read {count} records");

    let mut export = StagedExport::new(ctx.coordinator()?, ctx.target()?, schema, ctx.staging());
    let job = LocalJob::new(tasks).with_writer_options(ctx.config.writer_options());
    let report = job.run(&mut export, records).await?;

    for task in &report.tasks {
        println!(
            "task {}: {} records in {} ({} attempts)",
            task.task, task.stats.records, task.attempt, task.attempts_used
        );
    }
    println!(
        "{}",
        super::commit::format_commit(&export.target().export_ref().to_string(), &report.commit)
    );
    Ok(())
}

/// Records from a file, or stdin for `-`. Blank lines are skipped.
pub fn read_records(input: &Path) -> Result<Vec<Value>> {
    let text = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?
    };
    parse_records(&text)
}

pub fn parse_records(text: &str) -> Result<Vec<Value>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).map_err(|e| anyhow!("line {}: {e}", i + 1)))
        .collect()
}
