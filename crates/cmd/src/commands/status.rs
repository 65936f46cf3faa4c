// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Status command - reports what is externally visible about a run

use crate::common::ExportContext;
use anyhow::Result;
use bqexport::{ExportRunState, RunObservation};

#[allow(clippy::print_stdout)]
pub async fn status_command(ctx: &ExportContext, verbose: bool) -> Result<()> {
    let target = ctx.target()?;
    let staging = ctx.staging();
    let observation = ctx.coordinator()?.observe(&target, &staging).await?;

    println!("{}", format_status(&target.table_ref().to_string(), &observation, verbose));
    Ok(())
}

#[must_use]
pub fn format_status(table: &str, observation: &RunObservation, verbose: bool) -> String {
    let state = ExportRunState::from_observation(observation);
    let mut out = format!(
        "table {table}: {}\nstaged blobs: {}\nstate: {state}",
        if observation.table_exists { "exists" } else { "missing" },
        observation.staged_blobs.len()
    );
    if verbose {
        for blob in &observation.staged_blobs {
            out.push_str(&format!("\n  {blob}"));
        }
    }
    out
}
