//! PDF Markup Scheduler Library
//!
//! Background execution for the markup engine: a small worker pool whose
//! results come back over a completion channel drained by the owner thread,
//! and cancellation tokens so superseded work is skipped.
//!
//! # Example
//!
//! ```
//! use pdf_markup_scheduler::{CancellationToken, TaskOutcome, WorkerPool, WorkerPoolConfig};
//! use std::time::Duration;
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
//! pool.submit(Box::new(|_token: &CancellationToken| 21 * 2));
//!
//! let done = pool.wait_completion(Duration::from_secs(1)).unwrap();
//! assert!(matches!(done.outcome, TaskOutcome::Finished(42)));
//! ```

mod cancel;
mod worker;

pub use cancel::{CancellationToken, SupersedeRegistry};
pub use worker::{Completion, Task, TaskHandle, TaskId, TaskOutcome, WorkerPool, WorkerPoolConfig};
