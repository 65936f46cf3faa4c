// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! ExportCoordinator - prepare, commit and rollback of one staged export
//!
//! The coordinator keeps no state between calls. Each operation reads the
//! target and staging area it is given and acts on the external systems:
//!
//! - `prepare` drops the table (or its partition) and recreates it empty.
//! - `commit` loads every staged blob into the table, then deletes the blobs.
//! - `rollback` drops the table (or partition) and deletes the blobs.
//!
//! `prepare` and `commit` return their primary failure so the driver can stop
//! and roll back. `rollback` never fails; each compensating action is attempted
//! and its outcome recorded in a [`CleanupReport`].

use crate::error::{CleanupAction, ClientError, ExportError, PrepareStep};
use crate::retry::RetryPolicy;
use crate::storage::StorageClient;
use crate::target::{StagingArea, TableTarget};
use crate::warehouse::{TableSchema, WarehouseClient};
use diagnostics::*;
use std::sync::Arc;

/// Outcome of one compensating action.
#[derive(Debug)]
pub struct CleanupOutcome {
    pub action: CleanupAction,
    /// `Err` is always [`ExportError::Cleanup`].
    pub result: Result<(), ExportError>,
}

/// Every compensating action attempted by one `commit` or `rollback`.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExportError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    #[must_use]
    pub fn attempted(&self, action: CleanupAction) -> bool {
        self.outcomes.iter().any(|o| o.action == action)
    }
}

#[derive(Debug)]
pub struct CommitReport {
    /// Blob URIs loaded into the table.
    pub loaded_blobs: Vec<String>,
    /// Post-load deletion of the staged blobs; failures here never fail the commit.
    pub cleanup: CleanupReport,
}

/// What an external observer can see of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunObservation {
    pub table_exists: bool,
    pub staged_blobs: Vec<String>,
}

pub struct ExportCoordinator {
    warehouse: Arc<dyn WarehouseClient>,
    storage: Arc<dyn StorageClient>,
    policy: RetryPolicy,
    dataset_location: Option<String>,
}

impl ExportCoordinator {
    #[must_use]
    pub fn new(warehouse: Arc<dyn WarehouseClient>, storage: Arc<dyn StorageClient>) -> Self {
        Self {
            warehouse,
            storage,
            policy: RetryPolicy::default(),
            dataset_location: None,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_dataset_location(mut self, location: Option<String>) -> Self {
        self.dataset_location = location;
        self
    }

    #[must_use]
    pub fn storage(&self) -> Arc<dyn StorageClient> {
        self.storage.clone()
    }

    /// Make sure the staging bucket exists before any writer starts.
    pub async fn ensure_staging(&self, staging: &StagingArea) -> Result<(), ExportError> {
        let bucket = staging.bucket.as_str();
        let region = staging.region.as_deref();
        self.policy
            .run("ensure staging bucket", || self.storage.ensure_bucket(bucket, region))
            .await
            .map_err(|source| ExportError::Preparation {
                table: format!("gs://{bucket}"),
                step: PrepareStep::EnsureBucket,
                source,
            })
    }

    /// Drop any previous table or partition, then create the table afresh.
    pub async fn prepare(&self, target: &TableTarget, schema: &TableSchema) -> Result<(), ExportError> {
        let export_ref = target.export_ref();
        let table_ref = target.table_ref();
        let partitioning = target.partitioning();
        let name = export_ref.to_string();
        info!("preparing {name}");

        self.policy
            .run("drop table", || self.warehouse.drop_table(&export_ref))
            .await
            .map_err(|source| ExportError::Preparation {
                table: name.clone(),
                step: PrepareStep::DropTable,
                source,
            })?;

        let location = self.dataset_location.as_deref();
        self.policy
            .run("create table", || {
                self.warehouse
                    .create_table(&table_ref, schema, partitioning, location)
            })
            .await
            .map_err(|source| ExportError::Preparation {
                table: name.clone(),
                step: PrepareStep::CreateTable,
                source,
            })?;

        info!("prepared {name}");
        Ok(())
    }

    /// Load every staged blob into the prepared table, then remove the blobs.
    pub async fn commit(&self, target: &TableTarget, staging: &StagingArea) -> Result<CommitReport, ExportError> {
        let export_ref = target.export_ref();
        let name = export_ref.to_string();
        let bucket = staging.bucket.as_str();
        let prefix = staging.prefix();

        let blobs = self
            .policy
            .run("list staged blobs", || self.storage.list_blobs(bucket, &prefix))
            .await
            .map_err(|source| ExportError::Listing {
                prefix: staging.uri(),
                source,
            })?;

        let blob_count = blobs.len();
        if blobs.is_empty() {
            warn!("no staged blobs under {prefix}, {name} stays empty");
        } else {
            info!("loading {blob_count} staged blobs into {name}");
            self.policy
                .run("load table", || self.warehouse.load(&export_ref, &blobs))
                .await
                .map_err(|source| ExportError::Load {
                    table: name.clone(),
                    blob_count,
                    source,
                })?;
        }
        info!("committed {blob_count} blobs into {name}");

        let mut cleanup = CleanupReport::default();
        cleanup.outcomes.push(self.delete_staged(staging).await);
        Ok(CommitReport {
            loaded_blobs: blobs,
            cleanup,
        })
    }

    /// Best-effort removal of the table (or partition) and the staged blobs.
    pub async fn rollback(&self, target: &TableTarget, staging: &StagingArea) -> CleanupReport {
        let name = target.export_ref().to_string();
        info!("rolling back {name}");

        let report = CleanupReport {
            outcomes: vec![self.drop_target(target).await, self.delete_staged(staging).await],
        };

        if report.is_clean() {
            info!("rolled back {name}");
        } else {
            let failures = report.failures().count();
            error!("rollback of {name} finished with {failures} failed actions");
        }
        report
    }

    /// Reconstruct what is visible externally for a stateless driver.
    pub async fn observe(&self, target: &TableTarget, staging: &StagingArea) -> Result<RunObservation, ClientError> {
        let table_ref = target.table_ref();
        let table_exists = self
            .policy
            .run("check table", || self.warehouse.table_exists(&table_ref))
            .await?;
        let bucket = staging.bucket.as_str();
        let prefix = staging.prefix();
        let staged_blobs = self
            .policy
            .run("list staged blobs", || self.storage.list_blobs(bucket, &prefix))
            .await?;
        Ok(RunObservation {
            table_exists,
            staged_blobs,
        })
    }

    async fn drop_target(&self, target: &TableTarget) -> CleanupOutcome {
        let export_ref = target.export_ref();
        let subject = export_ref.to_string();
        let result = self
            .policy
            .run("rollback drop table", || self.warehouse.drop_table(&export_ref))
            .await
            .map(|_| ());
        self.outcome(CleanupAction::DropTable, subject, result)
    }

    async fn delete_staged(&self, staging: &StagingArea) -> CleanupOutcome {
        let bucket = staging.bucket.as_str();
        let prefix = staging.prefix();
        let result = self
            .policy
            .run("delete staged blobs", || self.storage.delete_blobs(bucket, &prefix))
            .await
            .map(|_| ());
        self.outcome(CleanupAction::DeleteStagedBlobs, staging.uri(), result)
    }

    fn outcome(&self, action: CleanupAction, subject: String, result: Result<(), ClientError>) -> CleanupOutcome {
        let result = result.map_err(|source| {
            let err = ExportError::Cleanup {
                action,
                subject,
                source,
            };
            let error_msg = err.to_string();
            error!("{error_msg}");
            err
        });
        CleanupOutcome { action, result }
    }
}
