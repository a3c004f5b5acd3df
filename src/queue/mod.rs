/**
 * C6 — Job Queue
 *
 * At-least-once background work dispatch: `enqueue` persists a job row,
 * `Worker` claims and runs it against a registered `JobHandler`, bounded
 * by per-queue concurrency and timeout limits.
 */
mod queue;
mod types;
mod worker;

pub use queue::JobQueue;
pub use types::{Job, JobKind, JobStatus, QueueLimits};
pub use worker::{JobHandler, Worker};
