// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Commit command - loads every staged blob into the prepared table

use crate::common::ExportContext;
use anyhow::Result;
use bqexport::CommitReport;

#[allow(clippy::print_stdout)]
pub async fn commit_command(ctx: &ExportContext) -> Result<()> {
    let target = ctx.target()?;
    let staging = ctx.staging();
    let report = ctx.coordinator()?.commit(&target, &staging).await?;

    println!("{}", format_commit(&target.export_ref().to_string(), &report));
    Ok(())
}

#[must_use]
pub fn format_commit(table: &str, report: &CommitReport) -> String {
    let mut out = format!("Loaded {} staged blobs into {table}", report.loaded_blobs.len());
    for failure in report.cleanup.failures() {
        out.push_str(&format!("\n  cleanup failed: {failure}"));
    }
    out
}
