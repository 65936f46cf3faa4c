// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! BigQuery REST v2 implementation of [`WarehouseClient`]

use crate::error::ClientError;
use crate::rest::{ProxySettings, RestClient};
use crate::target::{PartitioningScheme, TableRef};
use crate::warehouse::{TableSchema, WarehouseClient};
use async_trait::async_trait;
use diagnostics::*;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const POLL_INITIAL: Duration = Duration::from_millis(500);
const POLL_MAX: Duration = Duration::from_secs(10);

pub struct BigQueryClient {
    rest: RestClient,
    base_url: String,
    /// Location used when polling jobs; load jobs run where the dataset lives.
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Job {
    status: JobStatus,
}

impl BigQueryClient {
    pub fn new(token: impl Into<String>, proxy: Option<&ProxySettings>) -> Result<Self, ClientError> {
        Ok(Self {
            rest: RestClient::new(token, proxy)?,
            base_url: BASE_URL.to_string(),
            location: None,
        })
    }

    #[must_use]
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn table_url(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.base_url, table.project_id, table.dataset_id, table.table_id
        )
    }

    fn datasets_url(&self, project: &str) -> String {
        format!("{}/projects/{}/datasets", self.base_url, project)
    }

    fn tables_url(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables",
            self.base_url, table.project_id, table.dataset_id
        )
    }

    fn job_url(&self, project: &str, job_id: &str) -> String {
        let mut url = format!("{}/projects/{}/jobs/{}", self.base_url, project, job_id);
        if let Some(location) = &self.location {
            url.push_str(&format!("?location={location}"));
        }
        url
    }

    async fn ensure_dataset(&self, table: &TableRef, location: Option<&str>) -> Result<(), ClientError> {
        let body = dataset_resource(table, location);
        match self
            .rest
            .send_empty(Method::POST, &self.datasets_url(&table.project_id), Some(&body))
            .await
        {
            Err(e) if e.is_conflict() => Ok(()),
            other => other,
        }
    }

    async fn wait_for_job(&self, project: &str, job_id: &str) -> Result<(), ClientError> {
        let url = self.job_url(project, job_id);
        let mut delay = POLL_INITIAL;
        loop {
            let job: Job = self.rest.send(Method::GET, &url, None).await?;
            if job.status.state == "DONE" {
                return match job.status.error_result {
                    Some(err) => Err(ClientError::JobFailed {
                        job_id: job_id.to_string(),
                        message: format!(
                            "{}: {}",
                            err.reason.unwrap_or_default(),
                            err.message.unwrap_or_default()
                        ),
                    }),
                    None => Ok(()),
                };
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX);
        }
    }
}

fn dataset_resource(table: &TableRef, location: Option<&str>) -> Value {
    let mut body = json!({
        "datasetReference": {
            "projectId": table.project_id,
            "datasetId": table.dataset_id,
        }
    });
    if let Some(location) = location {
        body["location"] = json!(location);
    }
    body
}

fn table_resource(table: &TableRef, schema: &TableSchema, partitioning: PartitioningScheme) -> Value {
    let mut body = json!({
        "tableReference": {
            "projectId": table.project_id,
            "datasetId": table.dataset_id,
            "tableId": table.table_id,
        },
        "schema": schema,
    });
    if partitioning == PartitioningScheme::Daily {
        body["timePartitioning"] = json!({ "type": "DAY" });
    }
    body
}

fn load_job_resource(job_id: &str, table: &TableRef, blob_uris: &[String], location: Option<&str>) -> Value {
    let mut reference = json!({
        "projectId": table.project_id,
        "jobId": job_id,
    });
    if let Some(location) = location {
        reference["location"] = json!(location);
    }
    json!({
        "jobReference": reference,
        "configuration": {
            "load": {
                "sourceUris": blob_uris,
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "destinationTable": {
                    "projectId": table.project_id,
                    "datasetId": table.dataset_id,
                    "tableId": table.table_id,
                },
                "createDisposition": "CREATE_NEVER",
                "writeDisposition": "WRITE_TRUNCATE",
            }
        }
    })
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, ClientError> {
        match self.rest.send_empty(Method::GET, &self.table_url(table), None).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn drop_table(&self, table: &TableRef) -> Result<bool, ClientError> {
        match self.rest.send_empty(Method::DELETE, &self.table_url(table), None).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                let name = table.to_string();
                debug!("table {name} did not exist, nothing to drop");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        partitioning: PartitioningScheme,
        location: Option<&str>,
    ) -> Result<(), ClientError> {
        self.ensure_dataset(table, location).await?;

        let body = table_resource(table, schema, partitioning);
        match self.rest.send_empty(Method::POST, &self.tables_url(table), Some(&body)).await {
            Err(e) if e.is_conflict() => {
                let name = table.to_string();
                debug!("table {name} already exists");
                Ok(())
            }
            other => other,
        }
    }

    async fn load(&self, table: &TableRef, blob_uris: &[String]) -> Result<(), ClientError> {
        // New job per attempt; WRITE_TRUNCATE makes repeats replace.
        let job_id = format!("bqexport_load_{}", uuid7::uuid7());
        let body = load_job_resource(&job_id, table, blob_uris, self.location.as_deref());

        let count = blob_uris.len();
        let name = table.to_string();
        info!("submitting load job {job_id} for {count} blobs into {name}");

        self.rest
            .send_empty(
                Method::POST,
                &format!("{}/projects/{}/jobs", self.base_url, table.project_id),
                Some(&body),
            )
            .await?;
        self.wait_for_job(&table.project_id, &job_id).await
    }
}
