// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-process view of an export run's lifecycle

use crate::coordinator::RunObservation;
use crate::error::ExportError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportRunState {
    NotPrepared,
    Prepared,
    Committed,
    RolledBack,
}

impl fmt::Display for ExportRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportRunState::NotPrepared => "not prepared",
            ExportRunState::Prepared => "prepared",
            ExportRunState::Committed => "committed",
            ExportRunState::RolledBack => "rolled back",
        })
    }
}

impl ExportRunState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportRunState::Committed | ExportRunState::RolledBack)
    }

    /// Best guess from external evidence alone.
    ///
    /// A missing table is indistinguishable from a rolled-back run, and an
    /// existing table without staged blobs may be freshly prepared or already
    /// committed; those cases resolve to the earlier state.
    #[must_use]
    pub fn from_observation(observation: &RunObservation) -> Self {
        if observation.table_exists {
            ExportRunState::Prepared
        } else {
            ExportRunState::NotPrepared
        }
    }
}

/// Tracks one run through NotPrepared -> Prepared -> Committed | RolledBack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRun {
    state: ExportRunState,
}

impl Default for ExportRun {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportRun {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ExportRunState::NotPrepared,
        }
    }

    #[must_use]
    pub fn state(&self) -> ExportRunState {
        self.state
    }

    /// Apply a transition, rejecting anything the protocol does not allow.
    pub fn transition(&mut self, to: ExportRunState) -> Result<(), ExportError> {
        use ExportRunState::*;
        let allowed = matches!(
            (self.state, to),
            (NotPrepared, Prepared)
                | (Prepared, Committed)
                | (NotPrepared, RolledBack)
                | (Prepared, RolledBack)
        );
        if !allowed {
            return Err(ExportError::InvalidTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}
