// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use bqexport::{
    ACCESS_TOKEN_ENV, BigQueryClient, ExportConfig, ExportCoordinator, GcsOptions, ObjectStoreStaging, StagingArea,
    TableSchema, TableTarget, load_config,
};
use clap::Args;

/// Configuration file plus per-invocation overrides shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// YAML export configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Export into this daily partition (YYYY-MM-DD or YYYYMMDD)
    #[arg(long)]
    pub partition_date: Option<String>,

    /// Override the staging folder
    #[arg(long)]
    pub staging_folder: Option<String>,

    /// Records buffered per writer between uploads
    #[arg(long)]
    pub flush_interval: Option<usize>,

    #[arg(long, requires = "proxy_port")]
    pub proxy_host: Option<String>,

    #[arg(long, requires = "proxy_host")]
    pub proxy_port: Option<u16>,
}

/// A loaded, validated configuration for one export run.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub config: ExportConfig,
}

impl ExportContext {
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        let mut config = load_config(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?;

        if let Some(date) = &args.partition_date {
            config.table_partition_date = Some(date.clone());
        }
        if let Some(folder) = &args.staging_folder {
            config.staging_folder = folder.clone();
        }
        if let Some(interval) = args.flush_interval {
            config.flush_interval = interval;
        }
        if args.proxy_host.is_some() {
            config.proxy_host = args.proxy_host.clone();
            config.proxy_port = args.proxy_port;
        }
        config.validate()?;

        Ok(Self { config })
    }

    pub fn target(&self) -> Result<TableTarget> {
        Ok(self.config.target()?)
    }

    #[must_use]
    pub fn staging(&self) -> StagingArea {
        self.config.staging()
    }

    /// Build the coordinator over BigQuery and Cloud Storage.
    pub fn coordinator(&self) -> Result<ExportCoordinator> {
        let config = &self.config;
        let token = config
            .resolve_access_token()
            .ok_or_else(|| anyhow!("No access token: set access-token or {ACCESS_TOKEN_ENV}"))?;
        let proxy = config.proxy();

        let warehouse = BigQueryClient::new(token.clone(), proxy.as_ref())?.with_location(config.dataset_location.clone());
        let storage = ObjectStoreStaging::gcs(
            &config.staging_bucket,
            &GcsOptions {
                project: config.project.clone(),
                credentials: config.credentials.clone(),
                access_token: Some(token),
                proxy,
            },
        )?;

        Ok(ExportCoordinator::new(Arc::new(warehouse), Arc::new(storage))
            .with_retry_policy(config.retry_policy()?)
            .with_dataset_location(config.dataset_location.clone()))
    }
}

pub fn load_schema(path: &Path) -> Result<TableSchema> {
    TableSchema::from_file(path).with_context(|| format!("Failed to read schema {}", path.display()))
}
