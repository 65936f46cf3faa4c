// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Prepare command - creates the staging bucket and a fresh destination table
//!
//! Example:
//!   bqexport prepare --config export.yaml --schema schema.json

use std::path::Path;

use crate::common::{ExportContext, load_schema};
use anyhow::Result;
use diagnostics::*;

#[allow(clippy::print_stdout)]
pub async fn prepare_command(ctx: &ExportContext, schema_path: &Path) -> Result<()> {
    let schema = load_schema(schema_path)?;
    let target = ctx.target()?;
    let staging = ctx.staging();
    let coordinator = ctx.coordinator()?;

    let fields = schema.fields.len();
    debug!("preparing with {fields} top-level fields");

    coordinator.ensure_staging(&staging).await?;
    coordinator.prepare(&target, &schema).await?;

    println!("Prepared {} (staging {})", target.export_ref(), staging.uri());
    Ok(())
}
