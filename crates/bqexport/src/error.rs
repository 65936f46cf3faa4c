// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the staged export protocol

use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to the warehouse or the staging store.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} from {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("Load job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// True when the remote side reported that the resource is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status == 404,
            ClientError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            _ => false,
        }
    }

    /// True when the remote side reported that the resource already exists.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status == 409,
            ClientError::ObjectStore(object_store::Error::AlreadyExists { .. }) => true,
            _ => false,
        }
    }
}

/// Which half of `prepare` gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStep {
    DropTable,
    CreateTable,
    EnsureBucket,
}

impl std::fmt::Display for PrepareStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PrepareStep::DropTable => "drop table",
            PrepareStep::CreateTable => "create table",
            PrepareStep::EnsureBucket => "ensure staging bucket",
        })
    }
}

/// A compensating action run by `rollback` or after a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    DropTable,
    DeleteStagedBlobs,
}

impl std::fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CleanupAction::DropTable => "drop table",
            CleanupAction::DeleteStagedBlobs => "delete staged blobs",
        })
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Preparation of {table} failed at {step}: {source}")]
    Preparation {
        table: String,
        step: PrepareStep,
        #[source]
        source: ClientError,
    },

    #[error("Listing staged blobs under {prefix} failed: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: ClientError,
    },

    #[error("Loading {blob_count} staged blobs into {table} failed: {source}")]
    Load {
        table: String,
        blob_count: usize,
        #[source]
        source: ClientError,
    },

    #[error("Cleanup ({action}) of {subject} failed: {source}")]
    Cleanup {
        action: CleanupAction,
        subject: String,
        #[source]
        source: ClientError,
    },

    #[error("Writing staged blob {location} failed: {source}")]
    WriterIo {
        location: String,
        #[source]
        source: ClientError,
    },

    #[error("Invalid record for {location}: {message}")]
    InvalidRecord { location: String, message: String },

    #[error("Task {task} failed after {attempts} attempts: {source}")]
    TaskFailed {
        task: usize,
        attempts: usize,
        #[source]
        source: Box<ExportError>,
    },

    #[error("Task {task} panicked: {message}")]
    TaskPanicked { task: usize, message: String },

    #[error("Export run cannot go from {from} to {to}")]
    InvalidTransition {
        from: crate::run::ExportRunState,
        to: crate::run::ExportRunState,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
