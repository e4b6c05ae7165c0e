use crate::runtime::wait::WaitEvent;
use crate::runtime::{LocalSchedule, Schedule};
use std::sync::Arc;

// Public API
mod error;
pub use self::error::TaskError;

mod event;
pub use self::event::{EventTask, event};

mod handle;
pub use self::handle::{SharedTask, Task};

mod scheduled;
pub use self::scheduled::ScheduledTask;

// Internals
pub(crate) mod exec;

mod harness;

mod header;
pub(crate) use self::header::Header;

mod layout;

mod list;

mod raw;
pub(crate) use self::raw::RawTask;

mod state;

use self::exec::{Exec, RootExec, SignalExec};
use self::layout::{ResultCell, ResultHandle, TaskCell};

/// Spawns `func` as a root task on `scheduler` and returns a handle to its
/// eventual result.
pub fn spawn<S, F, R>(scheduler: &S, func: F) -> Task<R>
where
    S: Schedule,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let raw = allocate_task::<RootExec<F>, R, S>(scheduler.clone(), RootExec::new(func), 2);
    scheduler.schedule(ScheduledTask::from_raw(raw));
    // Safety: the second reference moves into the handle.
    unsafe { Task::from_raw(raw) }
}

/// Spawns `func` into the current worker's local queue.
///
/// On a pool worker thread the task lands in that worker's own deque, so a
/// thread that later blocks joining it can execute it itself. From any other
/// thread this degrades to a plain [`spawn`].
pub fn local_spawn<S, F, R>(scheduler: &S, func: F) -> Task<R>
where
    S: LocalSchedule,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    // Safety: `func` owns its captures (`'static`).
    unsafe { local_spawn_unchecked(scheduler, func) }
}

/// Returns a task that already completed with `value`.
pub fn ready<T: Send + 'static>(value: T) -> Task<T> {
    let raw = ResultCell::<T>::allocate(1);
    // Safety: the cell is settled before anyone else can observe it.
    unsafe { ResultHandle::<T>::from_raw(raw).finish(value) }
    unsafe { Task::from_raw(raw) }
}

/// [`local_spawn`] without the `'static` bound.
///
/// # Safety
///
/// Everything `func` borrows must stay alive until the returned task reaches
/// a terminal state; callers join before the borrows expire.
pub(crate) unsafe fn local_spawn_unchecked<S, F, R>(scheduler: &S, func: F) -> Task<R>
where
    S: LocalSchedule,
    F: FnOnce() -> R + Send,
    R: Send,
{
    let raw = allocate_task::<RootExec<F>, R, S>(scheduler.clone(), RootExec::new(func), 2);
    scheduler.schedule_local(ScheduledTask::from_raw(raw));
    unsafe { Task::from_raw(raw) }
}

/// Allocates a cell holding `refs` references owed to the caller.
pub(crate) fn allocate_task<F, R, S>(scheduler: S, func: F, refs: usize) -> RawTask
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    TaskCell::<F, R, S>::allocate(scheduler, func, refs)
}

/// Allocates a continuation cell and registers it against `parent`,
/// returning the handle to its eventual result.
pub(crate) fn make_continuation<F, R, S>(parent: RawTask, scheduler: &S, func: F) -> Task<R>
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    let cont = allocate_task(scheduler.clone(), func, 2);
    parent.add_continuation(cont);
    // Safety: the second reference moves into the handle.
    unsafe { Task::from_raw(cont) }
}

/// Registers a continuation on `raw` that signals `TASK_FINISHED` on `event`
/// once the task reaches a terminal state. Fires immediately if it already
/// has.
pub(crate) fn attach_signal(raw: RawTask, event: Arc<WaitEvent>) {
    let cont = allocate_task::<SignalExec, (), _>(
        crate::runtime::InlineScheduler,
        SignalExec::new(event),
        1,
    );
    raw.add_continuation(cont);
}
