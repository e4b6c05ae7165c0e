//! A fork/join task library.
//!
//! Computations are expressed as [`Task`] values that run on a scheduler,
//! carry a result or an error on completion, and support chaining
//! continuations, recursive forking with [`parallel_for`], and unwrapping of
//! task-returning callables.

pub mod partition;
pub use partition::{IndexRange, parallel_for};

pub mod runtime;
pub use runtime::{Builder, InlineScheduler, LocalSchedule, Pool, Schedule};

pub mod task;
pub use task::{
    EventTask, ScheduledTask, SharedTask, Task, TaskError, event, local_spawn, ready, spawn,
};

mod utils;
