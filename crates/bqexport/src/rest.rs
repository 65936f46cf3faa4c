// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Authenticated JSON-over-HTTP plumbing shared by the cloud adapters

use crate::error::ClientError;
use diagnostics::*;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const TIMEOUT_SECONDS: u64 = 120;

/// Outbound proxy for every call made by one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
}

impl ProxySettings {
    #[must_use]
    pub fn url(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Clone)]
pub struct RestClient {
    http_client: reqwest::Client,
    token: String,
}

impl RestClient {
    pub fn new(token: impl Into<String>, proxy: Option<&ProxySettings>) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(TIMEOUT_SECONDS));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy.url())?);
        }
        Ok(Self {
            http_client: builder.build()?,
            token: token.into(),
        })
    }

    /// Send a request and decode the JSON body.
    ///
    /// Non-success statuses become `ClientError::Api`, so callers can test
    /// `is_not_found()` / `is_conflict()`.
    pub async fn send<T>(&self, method: Method, url: &str, body: Option<&Value>) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let text = self.send_raw(method, url, body).await?;
        if text.trim().is_empty() {
            Ok(serde_json::from_value(Value::Null)?)
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }

    /// Like `send`, but ignores the response body.
    pub async fn send_empty(&self, method: Method, url: &str, body: Option<&Value>) -> Result<(), ClientError> {
        self.send_raw(method, url, body).await.map(|_| ())
    }

    async fn send_raw(&self, method: Method, url: &str, body: Option<&Value>) -> Result<String, ClientError> {
        let method_name = method.to_string();
        debug!("{method_name} {url}");

        let mut request = self.http_client.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await;
        if !status.is_success() {
            // The status alone drives not-found and conflict handling.
            let text = body.unwrap_or_else(|e| format!("unreadable error body: {e}"));
            return Err(api_error(status, url, &text));
        }
        Ok(body?)
    }
}

/// Pull the human-readable message out of a Google API error body.
fn api_error(status: StatusCode, url: &str, body: &str) -> ClientError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    ClientError::Api {
        status: status.as_u16(),
        url: url.to_string(),
        message,
    }
}
