//! Bookkeeping for long-running operations: cancellation, progress and the
//! result record shown by status queries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use uplift_common::{Error, ErrorReport};

/// Mutating operations, mutually exclusive with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Download,
    Apply,
    Confirm,
    Rollback,
    Enable,
    Startup,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Download => "download",
            OperationKind::Apply => "apply",
            OperationKind::Confirm => "confirm",
            OperationKind::Rollback => "rollback",
            OperationKind::Enable => "enable",
            OperationKind::Startup => "startup",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag. Only downloads observe it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> uplift_common::Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Shared progress counters, written by the worker and read by status.
#[derive(Debug, Default)]
pub struct OperationProgress {
    files_total: AtomicU64,
    files_done: AtomicU64,
    bytes_done: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub files_total: u64,
    pub files_done: u64,
    pub bytes_done: u64,
}

impl OperationProgress {
    pub fn set_total(&self, total: u64) {
        self.files_total.store(total, Ordering::Relaxed);
    }

    pub fn file_done(&self, bytes: u64) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_total: self.files_total.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a finished operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub id: String,
    pub kind: OperationKind,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl OperationResult {
    pub fn success(
        id: impl Into<String>,
        kind: OperationKind,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            finished_at: Utc::now(),
            ok: true,
            message: message.into(),
            error: None,
            detail,
        }
    }

    pub fn failure(id: impl Into<String>, kind: OperationKind, err: &Error) -> Self {
        Self {
            id: id.into(),
            kind,
            finished_at: Utc::now(),
            ok: false,
            message: err.to_string(),
            error: Some(err.report()),
            detail: None,
        }
    }
}
