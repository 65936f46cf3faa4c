// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Export configuration, loaded from YAML

use crate::error::ExportError;
use crate::rest::ProxySettings;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::target::{Compression, StagingArea, TableTarget, parse_partition_date};
use crate::writer::{DEFAULT_FLUSH_INTERVAL, WriterOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment fallback for the warehouse bearer token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

fn default_flush_interval() -> usize {
    DEFAULT_FLUSH_INTERVAL
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_jitter() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Durations use `parse_duration` syntax, e.g. `500ms`, `15 minutes`.
    #[serde(default)]
    pub initial_delay: Option<String>,
    #[serde(default)]
    pub max_delay: Option<String>,
    #[serde(default)]
    pub attempt_timeout: Option<String>,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: None,
            max_delay: None,
            attempt_timeout: None,
            jitter: true,
        }
    }
}

fn duration(field: &str, value: &Option<String>, default: Duration) -> Result<Duration, ExportError> {
    match value {
        Some(text) => parse_duration::parse(text)
            .map_err(|e| ExportError::Config(format!("invalid {field} '{text}': {e}"))),
        None => Ok(default),
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> Result<RetryPolicy, ExportError> {
        let defaults = RetryPolicy::default();
        let attempt_timeout = match self.attempt_timeout.as_deref() {
            Some("none") => None,
            _ => Some(duration(
                "attempt-timeout",
                &self.attempt_timeout,
                defaults.attempt_timeout.unwrap_or_default(),
            )?),
        };
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: duration("initial-delay", &self.initial_delay, defaults.initial_delay)?,
            max_delay: duration("max-delay", &self.max_delay, defaults.max_delay)?,
            jitter: self.jitter,
            attempt_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportConfig {
    pub project: String,
    pub dataset: String,
    pub table: String,
    /// Appended to `table` with an underscore.
    #[serde(default)]
    pub table_postfix: Option<String>,
    #[serde(default)]
    pub dataset_location: Option<String>,
    /// Service-account key file for the staging store.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub table_partition_date: Option<String>,
    pub staging_bucket: String,
    pub staging_folder: String,
    #[serde(default)]
    pub staging_region: Option<String>,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: usize,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Load and validate configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ExportConfig, ExportError> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        ExportError::Config(format!("failed to read {}: {e}", path.as_ref().display()))
    })?;
    let config: ExportConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| ExportError::Config(format!("failed to parse YAML configuration: {e}")))?;
    config.validate()?;
    Ok(config)
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), ExportError> {
        for (key, value) in [
            ("project", &self.project),
            ("dataset", &self.dataset),
            ("table", &self.table),
            ("staging-bucket", &self.staging_bucket),
            ("staging-folder", &self.staging_folder),
        ] {
            if value.trim().is_empty() {
                return Err(ExportError::Config(format!("{key} cannot be empty")));
            }
        }

        if self.staging_folder.trim().trim_matches('/').is_empty() {
            return Err(ExportError::Config(
                "staging-folder must name a folder below the bucket root".to_string(),
            ));
        }
        if self.flush_interval == 0 {
            return Err(ExportError::Config("flush-interval must be greater than 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ExportError::Config("retry max-attempts must be greater than 0".to_string()));
        }
        if self.proxy_host.is_some() != self.proxy_port.is_some() {
            return Err(ExportError::Config(
                "proxy-host and proxy-port must be given together".to_string(),
            ));
        }
        if let Some(date) = &self.table_partition_date {
            parse_partition_date(date)
                .map_err(|e| ExportError::Config(format!("invalid table-partition-date '{date}': {e}")))?;
        }
        self.retry.to_policy()?;
        Ok(())
    }

    #[must_use]
    pub fn table_name(&self) -> String {
        match &self.table_postfix {
            Some(postfix) if !postfix.is_empty() => format!("{}_{}", self.table, postfix),
            _ => self.table.clone(),
        }
    }

    pub fn target(&self) -> Result<TableTarget, ExportError> {
        let target = TableTarget::new(&self.project, &self.dataset, self.table_name());
        match &self.table_partition_date {
            Some(date) => {
                let date = parse_partition_date(date)
                    .map_err(|e| ExportError::Config(format!("invalid table-partition-date '{date}': {e}")))?;
                Ok(target.with_partition_date(date))
            }
            None => Ok(target),
        }
    }

    #[must_use]
    pub fn staging(&self) -> StagingArea {
        let area = StagingArea::new(&self.staging_bucket, &self.staging_folder);
        match &self.staging_region {
            Some(region) => area.with_region(region),
            None => area,
        }
    }

    #[must_use]
    pub fn proxy(&self) -> Option<ProxySettings> {
        match (&self.proxy_host, self.proxy_port) {
            (Some(host), Some(port)) => Some(ProxySettings {
                host: host.clone(),
                port,
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            flush_interval: self.flush_interval,
            compression: self.compression,
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ExportError> {
        self.retry.to_policy()
    }

    /// Configured token, else the environment.
    #[must_use]
    pub fn resolve_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
    }
}
