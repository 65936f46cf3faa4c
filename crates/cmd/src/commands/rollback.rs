// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Rollback command - drops the destination and deletes staged blobs
//!
//! Both actions are always attempted; failures are reported, not raised.

use crate::common::ExportContext;
use anyhow::Result;
use bqexport::CleanupReport;

#[allow(clippy::print_stdout)]
pub async fn rollback_command(ctx: &ExportContext) -> Result<()> {
    let target = ctx.target()?;
    let staging = ctx.staging();
    let report = ctx.coordinator()?.rollback(&target, &staging).await;

    println!("{}", format_cleanup(&report));
    Ok(())
}

#[must_use]
pub fn format_cleanup(report: &CleanupReport) -> String {
    report
        .outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(()) => format!("{}: ok", outcome.action),
            Err(e) => format!("{}: failed: {e}", outcome.action),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
