//! Compile pipeline: replay stored hypervisor operations into the account
//! ledger.
//!
//! This module provides:
//! - Resume-point computation from ledger contents
//! - Daily synthetic report scheduling
//! - The per-hypervisor replay loop

use crate::domain::Operation;
use serde::{Deserialize, Serialize};

pub mod incremental;
pub mod sequencer;

pub use incremental::Compiler;

/// Operations to replay for one hypervisor, in `(block, log_index)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPlan {
    /// First block the run may write to.
    pub resume_block: i64,
    /// Stored operations and scheduled reports.
    pub operations: Vec<Operation>,
    /// How many of `operations` are synthetic reports.
    pub reports: usize,
}

/// Tunables of a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileSettings {
    /// Concurrent tasks used when an event touches every shareholder.
    pub fanout_workers: usize,
    /// Reports closer than this many blocks to an operation or ledger block
    /// are not scheduled.
    pub report_proximity_blocks: i64,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            fanout_workers: 8,
            report_proximity_blocks: 30,
        }
    }
}

/// Result of one hypervisor replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileOutcome {
    /// `None` when there was nothing to replay.
    pub resume_block: Option<i64>,
    pub applied: usize,
    pub skipped: usize,
    pub snapshots_written: usize,
}

impl CompileOutcome {
    pub fn is_idle(&self) -> bool {
        self.resume_block.is_none()
    }
}
