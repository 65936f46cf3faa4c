// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Recording fakes for the warehouse and staging store

#![allow(dead_code)]

use async_trait::async_trait;
use bqexport::{
    BlobSink, ClientError, ObjectStoreStaging, PartitioningScheme, StagingArea, StagingLocation, StorageClient, TableRef,
    TableSchema, WarehouseClient,
};
use bytes::Bytes;
use object_store::memory::InMemory;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exists(String),
    Drop(String),
    Create(String, PartitioningScheme),
    Load(String, Vec<String>),
    EnsureBucket(String),
    List(String),
    Delete(String),
    Open(String),
}

/// Calls recorded by both fakes, in order.
#[derive(Debug, Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().expect("call log").push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().expect("call log").clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

/// Scripted failures: the next `n` calls of an operation fail.
#[derive(Debug, Default, Clone)]
pub struct Failures(Arc<Mutex<HashMap<&'static str, usize>>>);

impl Failures {
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.0.lock().expect("failures").insert(op, times);
    }

    pub fn fail_always(&self, op: &'static str) {
        self.fail_next(op, usize::MAX);
    }

    fn check(&self, op: &'static str) -> Result<(), ClientError> {
        let mut map = self.0.lock().expect("failures");
        match map.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ClientError::Other(format!("injected {op} failure")))
            }
            _ => Ok(()),
        }
    }
}

/// In-memory warehouse: tables keyed by `project.dataset.table`, partitions
/// tracked per table.
#[derive(Default)]
pub struct FakeWarehouse {
    pub log: CallLog,
    pub failures: Failures,
    tables: Mutex<HashMap<String, PartitioningScheme>>,
    loaded: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeWarehouse {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn with_table(self, name: &str, partitioning: PartitioningScheme) -> Self {
        self.tables.lock().expect("tables").insert(name.to_string(), partitioning);
        self
    }

    pub fn partitioning(&self, name: &str) -> Option<PartitioningScheme> {
        self.tables.lock().expect("tables").get(name).copied()
    }

    pub fn loaded(&self, name: &str) -> Option<Vec<String>> {
        self.loaded.lock().expect("loaded").get(name).cloned()
    }
}

fn base_name(table: &TableRef) -> String {
    let base = table.table_id.split('$').next().unwrap_or_default();
    format!("{}.{}.{}", table.project_id, table.dataset_id, base)
}

#[async_trait]
impl WarehouseClient for FakeWarehouse {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, ClientError> {
        self.log.push(Call::Exists(table.to_string()));
        self.failures.check("exists")?;
        Ok(self.tables.lock().expect("tables").contains_key(&base_name(table)))
    }

    async fn drop_table(&self, table: &TableRef) -> Result<bool, ClientError> {
        self.log.push(Call::Drop(table.to_string()));
        self.failures.check("drop")?;
        self.loaded.lock().expect("loaded").remove(&table.to_string());
        if table.table_id.contains('$') {
            // Dropping a partition leaves the table in place.
            return Ok(self.tables.lock().expect("tables").contains_key(&base_name(table)));
        }
        Ok(self.tables.lock().expect("tables").remove(&table.to_string()).is_some())
    }

    async fn create_table(
        &self,
        table: &TableRef,
        _schema: &TableSchema,
        partitioning: PartitioningScheme,
        _location: Option<&str>,
    ) -> Result<(), ClientError> {
        self.log.push(Call::Create(table.to_string(), partitioning));
        self.failures.check("create")?;
        self.tables
            .lock()
            .expect("tables")
            .entry(table.to_string())
            .or_insert(partitioning);
        Ok(())
    }

    async fn load(&self, table: &TableRef, blob_uris: &[String]) -> Result<(), ClientError> {
        self.log.push(Call::Load(table.to_string(), blob_uris.to_vec()));
        self.failures.check("load")?;
        if !self.tables.lock().expect("tables").contains_key(&base_name(table)) {
            return Err(ClientError::Api {
                status: 404,
                url: table.to_string(),
                message: "table not found".to_string(),
            });
        }
        self.loaded
            .lock()
            .expect("loaded")
            .insert(table.to_string(), blob_uris.to_vec());
        Ok(())
    }
}

/// Wraps an in-memory staging store, recording calls and injecting failures.
pub struct FakeStorage {
    pub log: CallLog,
    pub failures: Failures,
    pub inner: ObjectStoreStaging,
    pub store: Arc<InMemory>,
    /// Blob paths whose sink fails on its first append.
    failing_paths: Mutex<HashSet<String>>,
    /// Blob paths whose open panics.
    panicking_paths: Mutex<HashSet<String>>,
}

impl FakeStorage {
    pub fn new(bucket: &str, log: CallLog) -> Self {
        let store = Arc::new(InMemory::new());
        Self {
            log,
            failures: Failures::default(),
            inner: ObjectStoreStaging::new(bucket, store.clone()),
            store,
            failing_paths: Mutex::new(HashSet::new()),
            panicking_paths: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.failing_paths.lock().expect("paths").insert(path.to_string());
    }

    pub fn panic_on_open(&self, path: &str) {
        self.panicking_paths.lock().expect("paths").insert(path.to_string());
    }

    /// Put a finished blob directly, as a closed writer would have.
    pub async fn stage(&self, path: &str, body: &'static [u8]) -> Result<(), ClientError> {
        use object_store::{ObjectStore, PutPayload, path::Path};
        self.store.put(&Path::from(path), PutPayload::from_static(body)).await?;
        Ok(())
    }

    /// Blobs currently under the staging prefix, bypassing the call log.
    pub async fn list_blobs_now(&self, staging: &StagingArea) -> Result<Vec<String>, ClientError> {
        self.inner.list_blobs(&staging.bucket, &staging.prefix()).await
    }

    /// Raw contents of a staged blob.
    pub async fn read(&self, path: &str) -> Result<Bytes, ClientError> {
        use object_store::{ObjectStore, path::Path};
        Ok(self.store.get(&Path::from(path)).await?.bytes().await?)
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn ensure_bucket(&self, bucket: &str, region: Option<&str>) -> Result<(), ClientError> {
        self.log.push(Call::EnsureBucket(bucket.to_string()));
        self.failures.check("ensure_bucket")?;
        self.inner.ensure_bucket(bucket, region).await
    }

    async fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ClientError> {
        self.log.push(Call::List(format!("{bucket}/{prefix}")));
        self.failures.check("list")?;
        self.inner.list_blobs(bucket, prefix).await
    }

    async fn delete_blobs(&self, bucket: &str, prefix: &str) -> Result<usize, ClientError> {
        self.log.push(Call::Delete(format!("{bucket}/{prefix}")));
        self.failures.check("delete")?;
        self.inner.delete_blobs(bucket, prefix).await
    }

    async fn open_blob(&self, location: &StagingLocation) -> Result<Box<dyn BlobSink>, ClientError> {
        self.log.push(Call::Open(location.path.clone()));
        self.failures.check("open")?;
        let panics = self.panicking_paths.lock().expect("paths").contains(&location.path);
        assert!(!panics, "open of {} panicked", location.path);
        let sink = self.inner.open_blob(location).await?;
        if self.failing_paths.lock().expect("paths").remove(&location.path) {
            Ok(Box::new(FailingSink { inner: sink }))
        } else {
            Ok(sink)
        }
    }
}

struct FailingSink {
    inner: Box<dyn BlobSink>,
}

#[async_trait]
impl BlobSink for FailingSink {
    async fn append(&mut self, _bytes: Bytes) -> Result<(), ClientError> {
        Err(ClientError::Other("injected upload failure".to_string()))
    }

    async fn finish(self: Box<Self>) -> Result<(), ClientError> {
        Err(ClientError::Other("injected upload failure".to_string()))
    }

    async fn abort(self: Box<Self>) -> Result<(), ClientError> {
        self.inner.abort().await
    }
}
