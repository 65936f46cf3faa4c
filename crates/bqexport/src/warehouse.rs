// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Warehouse collaborator interface and the destination table schema

use crate::error::ClientError;
use crate::target::{PartitioningScheme, TableRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One column of the destination table, in the warehouse's JSON schema format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            description: None,
            fields: Vec::new(),
        }
    }
}

/// Destination schema, already converted from the source schema by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    #[must_use]
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Accepts either `{"fields": [...]}` or a bare field array, the two
    /// shapes the warehouse tooling emits.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<TableSchema>(json) {
            Ok(schema) => Ok(schema),
            Err(_) => serde_json::from_str::<Vec<FieldSchema>>(json).map(Self::new),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }
}

/// Table-level operations the coordinator needs from the warehouse.
///
/// Implementations must make `drop_table` and `create_table` safe to repeat:
/// dropping an absent table and creating an existing one both succeed.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, ClientError>;

    /// Returns whether anything was dropped.
    async fn drop_table(&self, table: &TableRef) -> Result<bool, ClientError>;

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        partitioning: PartitioningScheme,
        location: Option<&str>,
    ) -> Result<(), ClientError>;

    /// Bulk-load newline-delimited JSON blobs. Must replace the contents of
    /// `table` so that a repeated load never duplicates rows.
    async fn load(&self, table: &TableRef, blob_uris: &[String]) -> Result<(), ClientError>;
}
