// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

mod common;

use anyhow::Result;
use bqexport::{
    CleanupAction, Compression, ExportCoordinator, ExportError, FieldSchema, PartitioningScheme, PrepareStep,
    RetryPolicy, StagingArea, TableSchema, TableTarget, TaskAttemptId,
};
use chrono::NaiveDate;
use common::{Call, CallLog, FakeStorage, FakeWarehouse};
use std::sync::Arc;

fn schema() -> TableSchema {
    TableSchema::new(vec![FieldSchema::new("id", "INTEGER"), FieldSchema::new("name", "STRING")])
}

fn setup(warehouse: FakeWarehouse, log: &CallLog) -> (Arc<FakeWarehouse>, Arc<FakeStorage>, ExportCoordinator) {
    let warehouse = Arc::new(warehouse);
    let storage = Arc::new(FakeStorage::new("bucket", log.clone()));
    let coordinator = ExportCoordinator::new(warehouse.clone(), storage.clone()).with_retry_policy(RetryPolicy::immediate(3));
    (warehouse, storage, coordinator)
}

fn partition_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 1, 31).expect("valid date")
}

#[tokio::test]
async fn test_prepare_unpartitioned_creates_plain_table() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, _storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t");

    // The table does not exist yet; dropping it is not an error.
    coordinator.prepare(&target, &schema()).await?;

    assert_eq!(warehouse.partitioning("p.d.t"), Some(PartitioningScheme::None));
    assert_eq!(
        log.calls(),
        vec![
            Call::Drop("p.d.t".to_string()),
            Call::Create("p.d.t".to_string(), PartitioningScheme::None),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_prepare_partitioned_drops_partition_and_creates_daily_table() -> Result<()> {
    let log = CallLog::default();
    let warehouse = FakeWarehouse::new(log.clone()).with_table("p.d.t", PartitioningScheme::Daily);
    let (warehouse, _storage, coordinator) = setup(warehouse, &log);
    let target = TableTarget::new("p", "d", "t").with_partition_date(partition_date());

    coordinator.prepare(&target, &schema()).await?;

    assert_eq!(warehouse.partitioning("p.d.t"), Some(PartitioningScheme::Daily));
    assert_eq!(
        log.calls(),
        vec![
            Call::Drop("p.d.t$20170131".to_string()),
            Call::Create("p.d.t".to_string(), PartitioningScheme::Daily),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_prepare_retries_transient_create_failures() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, _storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    warehouse.failures.fail_next("create", 2);

    coordinator.prepare(&TableTarget::new("p", "d", "t"), &schema()).await?;

    assert_eq!(log.count(|c| matches!(c, Call::Create(..))), 3);
    assert!(warehouse.partitioning("p.d.t").is_some());
    Ok(())
}

#[tokio::test]
async fn test_prepare_fails_after_exhausting_create_budget() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, _storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    warehouse.failures.fail_always("create");

    let result = coordinator.prepare(&TableTarget::new("p", "d", "t"), &schema()).await;

    assert!(matches!(
        result,
        Err(ExportError::Preparation {
            step: PrepareStep::CreateTable,
            ..
        })
    ));
    assert_eq!(log.count(|c| matches!(c, Call::Create(..))), 3);
    Ok(())
}

#[tokio::test]
async fn test_prepare_drop_failure_stops_before_create() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, _storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    warehouse.failures.fail_always("drop");

    let result = coordinator.prepare(&TableTarget::new("p", "d", "t"), &schema()).await;

    assert!(matches!(
        result,
        Err(ExportError::Preparation {
            step: PrepareStep::DropTable,
            ..
        })
    ));
    assert_eq!(log.count(|c| matches!(c, Call::Drop(_))), 3);
    assert_eq!(log.count(|c| matches!(c, Call::Create(..))), 0);
    Ok(())
}

#[tokio::test]
async fn test_commit_loads_then_deletes_staged_blobs() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t");
    let staging = StagingArea::new("bucket", "folder");

    coordinator.prepare(&target, &schema()).await?;
    let blob = staging.location_for(&TaskAttemptId::new("a1"), Compression::Gzip);
    assert_eq!(blob.path, "folder/a1.gz");
    storage.stage(&blob.path, b"").await?;

    let report = coordinator.commit(&target, &staging).await?;

    assert_eq!(report.loaded_blobs, vec!["gs://bucket/folder/a1.gz".to_string()]);
    assert!(report.cleanup.is_clean());
    assert_eq!(warehouse.loaded("p.d.t"), Some(report.loaded_blobs.clone()));
    assert!(storage.list_blobs_now(&staging).await?.is_empty());

    let calls = log.calls();
    let load = calls.iter().position(|c| matches!(c, Call::Load(..)));
    let delete = calls.iter().position(|c| matches!(c, Call::Delete(_)));
    assert!(load < delete, "blobs deleted before load: {calls:?}");
    Ok(())
}

#[tokio::test]
async fn test_commit_with_failed_load_leaves_blobs_untouched() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t");
    let staging = StagingArea::new("bucket", "folder");
    coordinator.prepare(&target, &schema()).await?;
    storage.stage("folder/a1.gz", b"").await?;
    storage.stage("folder/a2.gz", b"").await?;
    warehouse.failures.fail_always("load");

    let result = coordinator.commit(&target, &staging).await;

    assert!(matches!(result, Err(ExportError::Load { blob_count: 2, .. })));
    assert_eq!(log.count(|c| matches!(c, Call::Load(..))), 3);
    assert_eq!(log.count(|c| matches!(c, Call::Delete(_))), 0);
    assert_eq!(storage.list_blobs_now(&staging).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_commit_retries_partial_load_as_a_unit() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t");
    let staging = StagingArea::new("bucket", "folder");
    coordinator.prepare(&target, &schema()).await?;
    storage.stage("folder/a1.gz", b"").await?;
    storage.stage("folder/a2.gz", b"").await?;
    warehouse.failures.fail_next("load", 1);

    coordinator.commit(&target, &staging).await?;

    let loads: Vec<Vec<String>> = log
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Load(_, blobs) => Some(blobs),
            _ => None,
        })
        .collect();
    assert_eq!(loads.len(), 2);
    assert_eq!(loads[0], loads[1]);
    Ok(())
}

#[tokio::test]
async fn test_commit_cleanup_failure_does_not_fail_commit() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t");
    let staging = StagingArea::new("bucket", "folder");
    coordinator.prepare(&target, &schema()).await?;
    storage.stage("folder/a1.gz", b"").await?;
    storage.failures.fail_always("delete");

    let report = coordinator.commit(&target, &staging).await?;

    assert!(!report.cleanup.is_clean());
    assert!(matches!(
        report.cleanup.failures().next(),
        Some(ExportError::Cleanup {
            action: CleanupAction::DeleteStagedBlobs,
            ..
        })
    ));
    assert!(warehouse.loaded("p.d.t").is_some());
    Ok(())
}

#[tokio::test]
async fn test_commit_into_partition() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t").with_partition_date(partition_date());
    let staging = StagingArea::new("bucket", "folder");
    coordinator.prepare(&target, &schema()).await?;
    storage.stage("folder/a1.gz", b"").await?;

    coordinator.commit(&target, &staging).await?;

    assert!(warehouse.loaded("p.d.t$20170131").is_some());
    Ok(())
}

#[tokio::test]
async fn test_rollback_attempts_both_actions_when_drop_fails() -> Result<()> {
    let log = CallLog::default();
    let warehouse = FakeWarehouse::new(log.clone()).with_table("p.d.t", PartitioningScheme::None);
    let (warehouse, storage, coordinator) = setup(warehouse, &log);
    let staging = StagingArea::new("bucket", "folder");
    storage.stage("folder/a1.gz", b"").await?;
    warehouse.failures.fail_always("drop");

    let report = coordinator.rollback(&TableTarget::new("p", "d", "t"), &staging).await;

    assert!(report.attempted(CleanupAction::DropTable));
    assert!(report.attempted(CleanupAction::DeleteStagedBlobs));
    assert_eq!(report.failures().count(), 1);
    assert!(storage.list_blobs_now(&staging).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rollback_attempts_both_actions_when_delete_fails() -> Result<()> {
    let log = CallLog::default();
    let warehouse = FakeWarehouse::new(log.clone()).with_table("p.d.t", PartitioningScheme::None);
    let (warehouse, storage, coordinator) = setup(warehouse, &log);
    storage.failures.fail_always("delete");

    let report = coordinator
        .rollback(&TableTarget::new("p", "d", "t"), &StagingArea::new("bucket", "folder"))
        .await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failures().count(), 1);
    assert!(warehouse.partitioning("p.d.t").is_none());
    Ok(())
}

#[tokio::test]
async fn test_rollback_with_everything_failing_still_returns() -> Result<()> {
    let log = CallLog::default();
    let (warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    warehouse.failures.fail_always("drop");
    storage.failures.fail_always("delete");

    let report = coordinator
        .rollback(&TableTarget::new("p", "d", "t"), &StagingArea::new("bucket", "folder"))
        .await;

    assert_eq!(report.failures().count(), 2);
    assert_eq!(log.count(|c| matches!(c, Call::Drop(_))), 3);
    assert_eq!(log.count(|c| matches!(c, Call::Delete(_))), 3);
    Ok(())
}

#[tokio::test]
async fn test_observe_reflects_external_state() -> Result<()> {
    let log = CallLog::default();
    let (_warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    let target = TableTarget::new("p", "d", "t");
    let staging = StagingArea::new("bucket", "folder");

    let before = coordinator.observe(&target, &staging).await?;
    assert!(!before.table_exists);

    coordinator.prepare(&target, &schema()).await?;
    storage.stage("folder/a1.gz", b"").await?;
    let after = coordinator.observe(&target, &staging).await?;
    assert!(after.table_exists);
    assert_eq!(after.staged_blobs, vec!["gs://bucket/folder/a1.gz".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_rollback_with_bucket_root_staging_keeps_other_blobs() -> Result<()> {
    let log = CallLog::default();
    let (_warehouse, storage, coordinator) = setup(FakeWarehouse::new(log.clone()), &log);
    storage.stage("other-run/a1.gz", b"").await?;
    storage.stage("unrelated/data.parquet", b"").await?;

    let report = coordinator
        .rollback(&TableTarget::new("p", "d", "t"), &StagingArea::new("bucket", "/"))
        .await;

    assert!(matches!(
        report.failures().next(),
        Some(ExportError::Cleanup {
            action: CleanupAction::DeleteStagedBlobs,
            ..
        })
    ));
    assert_eq!(storage.list_blobs_now(&StagingArea::new("bucket", "other-run")).await?.len(), 1);
    assert_eq!(storage.list_blobs_now(&StagingArea::new("bucket", "unrelated")).await?.len(), 1);
    Ok(())
}
