use crate::task::ScheduledTask;

// Public API
pub mod pool;
pub use pool::{Builder, Pool};

mod inline;
pub use inline::InlineScheduler;

// Exports
pub(crate) mod wait;

/// Scheduler trait.
///
/// A scheduler arranges for [`ScheduledTask::run`] to be invoked exactly once
/// on some thread, at some point after `schedule` returns (or during it, for
/// synchronous schedulers). Handles are cheap to clone; every task cell
/// captures a clone of the scheduler it will be submitted to when its parent
/// finishes.
///
/// A scheduler that panics out of `schedule` must not have enqueued the
/// task: the runtime treats such a panic as "this task will never run" and
/// cancels the task with the panic as its error.
pub trait Schedule: Clone + Send + Sync + 'static {
    /// Submit a task to run soon.
    fn schedule(&self, task: ScheduledTask);
}

/// A scheduler with a per-worker local queue.
///
/// `schedule_local` enqueues into a queue served by the *submitting* thread,
/// so that a thread which later blocks joining the task can pop and execute
/// it itself. Fork/join drivers like [`parallel_for`](crate::parallel_for)
/// require this; a scheduler without local queues cannot host them without
/// risking deadlock.
pub trait LocalSchedule: Schedule {
    /// Submit a task to the current worker's local queue.
    fn schedule_local(&self, task: ScheduledTask);
}
