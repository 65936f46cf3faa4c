// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging shared by the exporter crates.
//!
//! The level is selected with the `BQEXPORT_LOG` environment variable:
//! - `off` (default) - no logs
//! - `error` / `warn` - failures only, e.g. exhausted retries and cleanup errors
//! - `info` - protocol transitions (prepare, commit, rollback)
//! - `debug` - individual attempts, flushes and remote calls

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable consulted by [`init_diagnostics`].
pub const LOG_ENV: &str = "BQEXPORT_LOG";

static INIT: Once = Once::new();

fn level_for(value: &str) -> Option<emit::Level> {
    match value {
        "debug" => Some(emit::Level::Debug),
        "info" => Some(emit::Level::Info),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => None,
    }
}

/// Initialize diagnostics from `BQEXPORT_LOG`.
///
/// Safe to call more than once; only the first call installs the emitter.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let requested = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
        if requested == "off" {
            return;
        }

        let level = level_for(&requested);
        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level.unwrap_or(emit::Level::Info)))
            .init();

        if level.is_none() {
            emit::warn!("unknown log level {requested}, using info");
        }

        // The runtime must outlive every emitting thread.
        std::mem::forget(rt);
    });
}

// Re-exported as-is so templates like `"{uri}"` capture the caller's locals.
pub use emit::{debug, error, info, warn};

pub use init_diagnostics as init;
