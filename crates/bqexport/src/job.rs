// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hooks into the host job framework, and a local framework to drive them
//!
//! The host framework owns task scheduling and its own per-task output
//! commit. It calls `on_job_setup` once before any task attempt writes,
//! `on_job_commit` once after every task succeeded, and `on_job_abort` when
//! the job failed. [`StagedExport`] maps those hooks onto the coordinator.

use crate::coordinator::{CleanupReport, CommitReport, ExportCoordinator};
use crate::error::ExportError;
use crate::run::{ExportRun, ExportRunState};
use crate::storage::StorageClient;
use crate::target::{StagingArea, TableTarget, TaskAttemptId};
use crate::warehouse::TableSchema;
use crate::writer::{StagedRecordWriter, WriterOptions, WriterStats};
use async_trait::async_trait;
use diagnostics::*;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait CommitIntegration: Send {
    /// Runs once, before any task attempt starts writing.
    async fn on_job_setup(&mut self) -> Result<(), ExportError>;

    /// Runs once, after the framework reports that every task succeeded.
    async fn on_job_commit(&mut self) -> Result<CommitReport, ExportError>;

    /// Runs when the job failed. Never fails itself.
    async fn on_job_abort(&mut self) -> CleanupReport;
}

/// One export run bound to its target, schema and staging area.
pub struct StagedExport {
    coordinator: ExportCoordinator,
    target: TableTarget,
    schema: TableSchema,
    staging: StagingArea,
    run: ExportRun,
}

impl StagedExport {
    #[must_use]
    pub fn new(coordinator: ExportCoordinator, target: TableTarget, schema: TableSchema, staging: StagingArea) -> Self {
        Self {
            coordinator,
            target,
            schema,
            staging,
            run: ExportRun::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ExportRunState {
        self.run.state()
    }

    #[must_use]
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    #[must_use]
    pub fn target(&self) -> &TableTarget {
        &self.target
    }

    #[must_use]
    pub fn storage(&self) -> Arc<dyn StorageClient> {
        self.coordinator.storage()
    }

    async fn roll_back(&mut self) -> CleanupReport {
        let report = self.coordinator.rollback(&self.target, &self.staging).await;
        if let Err(e) = self.run.transition(ExportRunState::RolledBack) {
            let error_msg = e.to_string();
            warn!("{error_msg}");
        }
        report
    }
}

#[async_trait]
impl CommitIntegration for StagedExport {
    async fn on_job_setup(&mut self) -> Result<(), ExportError> {
        if self.run.state() != ExportRunState::NotPrepared {
            return Err(ExportError::InvalidTransition {
                from: self.run.state(),
                to: ExportRunState::Prepared,
            });
        }
        let prepared = match self.coordinator.ensure_staging(&self.staging).await {
            Ok(()) => self.coordinator.prepare(&self.target, &self.schema).await,
            Err(e) => Err(e),
        };
        match prepared {
            Ok(()) => self.run.transition(ExportRunState::Prepared),
            Err(e) => {
                self.roll_back().await;
                Err(e)
            }
        }
    }

    async fn on_job_commit(&mut self) -> Result<CommitReport, ExportError> {
        if self.run.state() != ExportRunState::Prepared {
            return Err(ExportError::InvalidTransition {
                from: self.run.state(),
                to: ExportRunState::Committed,
            });
        }
        match self.coordinator.commit(&self.target, &self.staging).await {
            Ok(report) => {
                self.run.transition(ExportRunState::Committed)?;
                Ok(report)
            }
            Err(e) => {
                self.roll_back().await;
                Err(e)
            }
        }
    }

    async fn on_job_abort(&mut self) -> CleanupReport {
        if self.run.state() == ExportRunState::Committed {
            let name = self.target.qualified_name();
            warn!("abort after commit of {name} ignored");
            return CleanupReport::default();
        }
        self.roll_back().await
    }
}

/// Result of a [`LocalJob`] run.
#[derive(Debug)]
pub struct JobReport {
    pub tasks: Vec<TaskReport>,
    pub commit: CommitReport,
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: usize,
    pub attempt: TaskAttemptId,
    pub attempts_used: usize,
    pub stats: WriterStats,
}

/// A minimal host framework: splits records into tasks, runs each task
/// concurrently, retries failed attempts as fresh attempts, then fires the
/// commit or abort hook.
#[derive(Debug, Clone)]
pub struct LocalJob {
    pub job_id: String,
    pub tasks: usize,
    pub max_task_attempts: usize,
    pub writer_options: WriterOptions,
}

impl LocalJob {
    #[must_use]
    pub fn new(tasks: usize) -> Self {
        Self {
            job_id: uuid7::uuid7().to_string().replace('-', ""),
            tasks: tasks.max(1),
            max_task_attempts: 2,
            writer_options: WriterOptions::default(),
        }
    }

    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    #[must_use]
    pub fn with_max_task_attempts(mut self, attempts: usize) -> Self {
        self.max_task_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_writer_options(mut self, options: WriterOptions) -> Self {
        self.writer_options = options;
        self
    }

    /// Round-robin split so every task gets a similar share.
    fn split(&self, records: Vec<Value>) -> Vec<Vec<Value>> {
        let mut splits: Vec<Vec<Value>> = (0..self.tasks).map(|_| Vec::new()).collect();
        for (i, record) in records.into_iter().enumerate() {
            splits[i % self.tasks].push(record);
        }
        splits
    }

    pub async fn run(&self, export: &mut StagedExport, records: Vec<Value>) -> Result<JobReport, ExportError> {
        export.on_job_setup().await?;

        let storage = export.storage();
        let staging = export.staging().clone();
        let job_id = self.job_id.clone();
        let total = records.len();
        let tasks = self.tasks;
        info!("job {job_id}: {total} records across {tasks} tasks");

        let mut handles = Vec::with_capacity(self.tasks);
        for (task, split) in self.split(records).into_iter().enumerate() {
            let storage = storage.clone();
            let staging = staging.clone();
            let job_id = job_id.clone();
            let options = self.writer_options;
            let max_attempts = self.max_task_attempts;
            let handle = tokio::spawn(async move {
                run_task(storage.as_ref(), &staging, &job_id, task, &split, options, max_attempts).await
            });
            handles.push((task, handle));
        }

        // Every task runs to completion before commit or abort.
        let mut reports = Vec::new();
        let mut failure = None;
        for (task, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(join_error) => {
                    failure.get_or_insert(ExportError::TaskPanicked {
                        task,
                        message: join_error.to_string(),
                    });
                }
            }
        }

        if let Some(e) = failure {
            let error_msg = e.to_string();
            error!("job {job_id} failed: {error_msg}");
            export.on_job_abort().await;
            return Err(e);
        }

        reports.sort_by_key(|r| r.task);
        let commit = export.on_job_commit().await?;
        Ok(JobReport { tasks: reports, commit })
    }
}

async fn run_task(
    storage: &dyn StorageClient,
    staging: &StagingArea,
    job_id: &str,
    task: usize,
    records: &[Value],
    options: WriterOptions,
    max_attempts: usize,
) -> Result<TaskReport, ExportError> {
    let mut last_error = None;
    for attempt_no in 0..max_attempts {
        let attempt = TaskAttemptId::for_task(job_id, task, attempt_no);
        match write_attempt(storage, staging, &attempt, records, options).await {
            Ok(stats) => {
                return Ok(TaskReport {
                    task,
                    attempt,
                    attempts_used: attempt_no + 1,
                    stats,
                });
            }
            Err(e) => {
                let attempt_name = attempt.to_string();
                let error_msg = e.to_string();
                warn!("task attempt {attempt_name} failed: {error_msg}");
                last_error = Some(e);
            }
        }
    }
    Err(ExportError::TaskFailed {
        task,
        attempts: max_attempts,
        source: Box::new(last_error.unwrap_or_else(|| ExportError::Config("task never ran".to_string()))),
    })
}

async fn write_attempt(
    storage: &dyn StorageClient,
    staging: &StagingArea,
    attempt: &TaskAttemptId,
    records: &[Value],
    options: WriterOptions,
) -> Result<WriterStats, ExportError> {
    let mut writer = StagedRecordWriter::create(storage, staging, attempt, options).await?;
    for record in records {
        if let Err(e) = writer.write(record).await {
            if let Err(abort_error) = writer.abort().await {
                let error_msg = abort_error.to_string();
                warn!("abort of failed attempt left a partial upload: {error_msg}");
            }
            return Err(e);
        }
    }
    writer.close().await
}
