// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Destination and staging identities
//!
//! These values are built once by the driver and handed to the coordinator and
//! to every writer. Nothing here is mutated after construction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the destination table is divided by a date partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitioningScheme {
    None,
    Daily,
}

/// A fully qualified warehouse table, optionally carrying a partition decorator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Destination identity for one export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    project: String,
    dataset: String,
    table: String,
    partition_date: Option<NaiveDate>,
}

impl TableTarget {
    #[must_use]
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
            partition_date: None,
        }
    }

    #[must_use]
    pub fn with_partition_date(mut self, date: NaiveDate) -> Self {
        self.partition_date = Some(date);
        self
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn partition_date(&self) -> Option<NaiveDate> {
        self.partition_date
    }

    /// DAILY exactly when a partition date is present.
    #[must_use]
    pub fn partitioning(&self) -> PartitioningScheme {
        match self.partition_date {
            Some(_) => PartitioningScheme::Daily,
            None => PartitioningScheme::None,
        }
    }

    /// The table as a whole, used for creation.
    #[must_use]
    pub fn table_ref(&self) -> TableRef {
        TableRef {
            project_id: self.project.clone(),
            dataset_id: self.dataset.clone(),
            table_id: self.table.clone(),
        }
    }

    /// The unit this run owns: the partition (`table$YYYYMMDD`) when
    /// partitioned, otherwise the whole table. Drops and loads target this.
    #[must_use]
    pub fn export_ref(&self) -> TableRef {
        let mut table_ref = self.table_ref();
        if let Some(date) = self.partition_date {
            table_ref.table_id = format!("{}${}", self.table, date.format("%Y%m%d"));
        }
        table_ref
    }

    /// `project.dataset.table`, without decorator.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        self.table_ref().to_string()
    }
}

/// Parse a partition date given either as `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_partition_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
}

/// Codec applied to staging blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    None,
}

impl Compression {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::None => "json",
        }
    }
}

/// Unique, stable identifier of one task attempt, supplied by the host scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskAttemptId(String);

impl TaskAttemptId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Scheduler-style id: `attempt_<job>_<task>_<attempt>`.
    #[must_use]
    pub fn for_task(job_id: &str, task: usize, attempt: usize) -> Self {
        Self(format!("attempt_{job_id}_{task:06}_{attempt}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The staging prefix shared by all writers of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    pub bucket: String,
    pub folder: String,
    pub region: Option<String>,
}

impl StagingArea {
    #[must_use]
    pub fn new(bucket: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            folder: folder.into().trim_matches('/').to_string(),
            region: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Listing/deletion prefix; always ends with `/` so `run1` never matches `run10`.
    #[must_use]
    pub fn prefix(&self) -> String {
        if self.folder.is_empty() {
            String::new()
        } else {
            format!("{}/", self.folder)
        }
    }

    /// `gs://bucket/folder/`
    #[must_use]
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.prefix())
    }

    /// The blob owned by one task attempt.
    #[must_use]
    pub fn location_for(&self, attempt: &TaskAttemptId, compression: Compression) -> StagingLocation {
        StagingLocation {
            bucket: self.bucket.clone(),
            path: format!("{}{}.{}", self.prefix(), attempt, compression.extension()),
        }
    }
}

/// One staging blob: `staging-folder/<task-attempt-id>.<ext>` in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingLocation {
    pub bucket: String,
    pub path: String,
}

impl StagingLocation {
    #[must_use]
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.path)
    }
}

impl fmt::Display for StagingLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}
