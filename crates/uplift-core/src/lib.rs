//! uplift core library
//!
//! This library provides the update lifecycle of a deployed application:
//! - Persisted update state and cross-process locking
//! - Remote release sources (branch, GitHub release, local directory)
//! - Download staging with checksum verification
//! - Backup snapshots, apply and rollback
//! - Startup health evaluation and the failure circuit breaker
//! - The `UpdateManager` facade, periodic scheduler and long-running service
//! - Structured logging and CLI exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod apply;
pub mod backup;
pub mod exit_codes;
pub mod fsutil;
pub mod health;
pub mod layout;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod operation;
pub mod remote;
pub mod resolver;
pub mod restart;
pub mod scheduler;
pub mod service;
pub mod stager;
pub mod state;

pub use health::{ConfirmOutcome, RollbackCause, RollbackReport, StartupVerdict};
pub use layout::UpdatePaths;
pub use manager::{OperationHandle, StatusReport, UpdateManager};
pub use operation::{CancelToken, OperationKind, OperationResult};
pub use remote::{Remote, RemoteSource};
pub use resolver::CheckOutcome;
pub use restart::{RestartTrigger, Restarter};
pub use service::UpdateService;
pub use state::{Phase, StateStore, UpdateState};
