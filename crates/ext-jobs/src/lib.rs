//! # ext-jobs
//!
//! Tracked background execution of extension lifecycle calls.
//!
//! An asynchronous call such as [`ExtensionOps::enable_async`] records a
//! queued [`Operation`] in the [`OperationTracker`], hands a [`Job`] to a
//! [`JobRunner`] and returns the operation id at once. Callers poll the
//! tracker for progress; there is no cancellation.
//!
//! ## Modules
//!
//! - [`operation`]: operation records and partial updates
//! - [`store`]: TTL key-value store and clocks
//! - [`tracker`]: the operation tracker
//! - [`job`]: enable, disable and install-dependencies jobs
//! - [`runner`]: tokio, thread and inline job runners
//! - [`ops`]: the asynchronous dispatch surface

pub mod error;
pub mod job;
pub mod operation;
pub mod ops;
pub mod runner;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
pub use job::{DisableJob, EnableJob, InstallDepsJob, Job, JobContext, JobTarget};
pub use operation::{Operation, OperationStatus, OperationType, OperationUpdate};
pub use ops::{ExtensionOps, ExtensionOverview, OperationCounts, OperationsSummary};
pub use runner::{InlineRunner, JobRunner, ThreadRunner, TokioRunner};
pub use store::{Clock, ExpiringMap, ManualClock, SystemClock};
pub use tracker::{DEFAULT_TTL, OperationTracker};
