//! The asynchronous accrual pipeline.
//!
//! [`queue::JobQueue`] is the process-wide concurrency primitive: a
//! bounded FIFO of job futures drained by a fixed worker pool, with a
//! global pause/resume gate and delayed submission. [`accrual::AccrualPoller`]
//! drives each uploaded order through its lifecycle by polling the
//! external accrual calculator from queue workers.

pub mod accrual;
pub mod queue;

pub use accrual::{AccrualPoller, PollerConfig};
pub use queue::{Job, JobQueue, QueueError};
