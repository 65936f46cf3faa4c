// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Staged export of batch job output into a BigQuery table
//!
//! Parallel task attempts each write one compressed, newline-delimited JSON
//! blob to a staging folder in cloud storage. A single driver then loads all
//! staged blobs into the destination table in one bulk load, or rolls back.
//!
//! # Architecture
//!
//! - **ExportCoordinator**: prepare / commit / rollback against the warehouse
//!   and the staging store, every remote call under a [`RetryPolicy`]
//! - **StagedRecordWriter**: one per task attempt, owns one staging blob
//! - **WarehouseClient** / **StorageClient**: the collaborator interfaces, with
//!   BigQuery REST and `object_store` implementations
//! - **CommitIntegration**: the hooks a host job framework calls; `LocalJob`
//!   is a small in-process host for the command line and tests
//!
//! # Usage
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use bqexport::{ExportCoordinator, LocalJob, StagedExport, load_config};
//! use bqexport::{BigQueryClient, GcsOptions, ObjectStoreStaging, TableSchema};
//! use std::sync::Arc;
//!
//! let config = load_config("export.yaml")?;
//! let token = config.resolve_access_token().unwrap_or_default();
//! let warehouse = BigQueryClient::new(token, config.proxy().as_ref())?;
//! let storage = ObjectStoreStaging::gcs(&config.staging_bucket, &GcsOptions::default())?;
//! let coordinator = ExportCoordinator::new(Arc::new(warehouse), Arc::new(storage))
//!     .with_retry_policy(config.retry_policy()?);
//!
//! let schema = TableSchema::from_file("schema.json")?;
//! let mut export = StagedExport::new(coordinator, config.target()?, schema, config.staging());
//! let records = vec![serde_json::json!({"id": 1})];
//! LocalJob::new(4).run(&mut export, records).await?;
//! # Ok(())
//! # }
//! ```

mod bigquery;
mod config;
mod coordinator;
mod error;
mod job;
mod rest;
mod retry;
mod run;
mod storage;
mod target;
mod warehouse;
mod writer;

pub use bigquery::BigQueryClient;
pub use config::{ACCESS_TOKEN_ENV, ExportConfig, RetryConfig, load_config};
pub use coordinator::{CleanupOutcome, CleanupReport, CommitReport, ExportCoordinator, RunObservation};
pub use error::{CleanupAction, ClientError, ExportError, PrepareStep};
pub use job::{CommitIntegration, JobReport, LocalJob, StagedExport, TaskReport};
pub use rest::ProxySettings;
pub use retry::RetryPolicy;
pub use run::{ExportRun, ExportRunState};
pub use storage::{BlobSink, GcsOptions, ObjectStoreStaging, StorageClient};
pub use target::{
    Compression, PartitioningScheme, StagingArea, StagingLocation, TableRef, TableTarget, TaskAttemptId,
    parse_partition_date,
};
pub use warehouse::{FieldSchema, TableSchema, WarehouseClient};
pub use writer::{DEFAULT_FLUSH_INTERVAL, StagedRecordWriter, WriterOptions, WriterStats};

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;
