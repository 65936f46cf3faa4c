// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry of remote calls
//!
//! Every operation wrapped here must be safe to repeat ("drop if exists",
//! idempotent create, replace-style load). Each attempt is optionally bounded
//! by a timeout, and an expired attempt counts as a failed one.

use crate::error::ClientError;
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, with no delay and no per-attempt timeout.
    #[must_use]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            attempt_timeout: None,
        }
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.max(1) - 1);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the first success, or the error of the last attempt.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempts = AtomicUsize::new(0);
        let max_attempts = self.max_attempts.max(1);
        let attempt_timeout = self.attempt_timeout;

        let result = (|| {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let fut = op();
            async move {
                debug!("{what}: attempt {attempt} of {max_attempts}");
                match attempt_timeout {
                    Some(limit) => tokio::time::timeout(limit, fut)
                        .await
                        .map_err(|_| ClientError::Timeout(limit))?,
                    None => fut.await,
                }
            }
        })
        .retry(self.backoff())
        .sleep(tokio::time::sleep)
        .notify(|err: &ClientError, delay: Duration| {
            let attempt = attempts.load(Ordering::Relaxed);
            let error_msg = err.to_string();
            let delay_ms = delay.as_millis() as u64;
            warn!("{what}: attempt {attempt} failed, retrying in {delay_ms}ms: {error_msg}");
        })
        .await;

        if let Err(err) = &result {
            let attempt = attempts.load(Ordering::Relaxed);
            let error_msg = err.to_string();
            error!("{what}: giving up after {attempt} attempts: {error_msg}");
        }
        result
    }
}
