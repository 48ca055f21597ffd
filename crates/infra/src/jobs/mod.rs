//! Task registry and deferred execution of row jobs.
//!
//! ## Design
//!
//! - Every long-running job is a task: a hash of string fields plus a lock key
//!   and a per-owner index, all kept in a hash-map service
//! - Calls are dispatched by method name, either run in place or queued
//! - Workers drain named queues, archiving each item before running it
//! - Row jobs scan a key range, transform one column and report progress
//!
//! ## Components
//!
//! - `JobRegistry`: create/load/list/delete tasks, teardown hooks
//! - `Dispatcher` / `MethodTable`: local or queued calls
//! - `WorkQueue` / `Worker`: FIFO queues and the worker loop
//! - `RowJobRunner`: per-row map over a scan
//! - `Reconciler`: folds external job status into tasks
//! - `ComputeLauncher`: seam to an external compute cluster

pub mod dispatch;
pub mod launcher;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod row_job;
pub mod types;
pub mod worker;

pub use dispatch::{
    DispatchError, DispatchMode, Dispatcher, JobContext, JobMethod, MethodTable, ROW_JOB_TASK_TYPE,
};
pub use launcher::{
    ComputeLauncher, LaunchError, LaunchHandle, LaunchRequest, LaunchStatus, wait_till_started,
};
pub use queue::{WorkItem, WorkQueue, archive_queue};
pub use reconcile::{ExternalJobTracker, Reconciler};
pub use registry::{JobRegistry, RegistryError, TaskUpdater, TeardownHook};
pub use row_job::{
    CopyTransform, RowJobParams, RowJobRunner, RowJobSummary, RowTransform, TransformError,
};
pub use types::{Task, TaskColumns, TaskProgress, TaskStatus, TaskToken};
pub use worker::{Worker, WorkerError, WorkerHandle, WorkerOptions};
