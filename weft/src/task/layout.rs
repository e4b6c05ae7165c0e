#![allow(unsafe_op_in_unsafe_fn)]

use crate::runtime::Schedule;
use crate::task::Header;
use crate::task::error::TaskError;
use crate::task::exec::Exec;
use crate::task::harness::Harness;
use crate::task::raw::RawTask;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// The full task cell for a function-bearing task.
///
/// It is critical for `Header` to be the first field, and for the fields up
/// to and including `output` to match `ResultCell<R>` exactly: the cell is
/// referenced as `*mut Header` by type-erased code and as `*mut
/// ResultCell<R>` by code that knows the result type but not the callable or
/// scheduler (handles, the unwrap forwarder, event producers). `#[repr(C)]`
/// makes both prefixes layout-compatible.
#[repr(C)]
pub(crate) struct TaskCell<F, R, S> {
    pub(super) header: Header,

    /// Result or error once terminal, per the state byte.
    pub(super) output: UnsafeCell<Output<R>>,

    /// Scheduler this task is submitted to when it is a continuation being
    /// scheduled by its finishing parent.
    pub(super) scheduler: S,

    /// The captured callable; taken out exactly once by `run`, or dropped
    /// un-run by `cancel`.
    pub(super) func: UnsafeCell<Option<F>>,
}

/// Prefix of every cell shape: header plus the typed output slot. Event
/// tasks are allocated as exactly this.
#[repr(C)]
pub(crate) struct ResultCell<R> {
    pub(super) header: Header,
    pub(super) output: UnsafeCell<Output<R>>,
}

/// Output slot contents. The atomic state byte is the authoritative tag:
/// `Finished` iff `COMPLETED`, `Faulted` iff `CANCELED`. The discriminant
/// here exists so the right destructor runs without consulting the state.
pub(crate) enum Output<R> {
    Empty,
    Finished(R),
    Faulted(TaskError),
}

impl<F, R, S> TaskCell<F, R, S>
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    /// Allocates a cell holding `refs` references owed to the caller.
    pub(super) fn allocate(scheduler: S, func: F, refs: usize) -> RawTask {
        let cell = Box::new(TaskCell {
            header: Header::new(vtable::<F, R, S>(), refs),
            output: UnsafeCell::new(Output::<R>::Empty),
            scheduler,
            func: UnsafeCell::new(Some(func)),
        });
        let ptr = NonNull::from(Box::leak(cell)).cast::<Header>();
        unsafe { RawTask::from_raw(ptr) }
    }
}

impl<R: Send> ResultCell<R> {
    /// Allocates a result-only cell (an event task).
    pub(super) fn allocate(refs: usize) -> RawTask {
        let cell = Box::new(ResultCell::<R> {
            header: Header::new(event_vtable::<R>(), refs),
            output: UnsafeCell::new(Output::Empty),
        });
        let ptr = NonNull::from(Box::leak(cell)).cast::<Header>();
        unsafe { RawTask::from_raw(ptr) }
    }
}

/// Typed view of a cell through its `ResultCell<R>` prefix.
///
/// This is how handles read a task's outcome and how the unwrap forwarder
/// settles a parent whose callable type it cannot name. All methods require
/// that the cell really stores results of type `R`, and the output accessors
/// additionally require the state byte to have been observed terminal with
/// `Acquire` (or the caller to be the executing thread).
pub(crate) struct ResultHandle<R> {
    raw: RawTask,
    _p: PhantomData<fn() -> R>,
}

impl<R> ResultHandle<R> {
    /// Safety: the cell behind `raw` must store results of type `R`.
    pub(crate) unsafe fn from_raw(raw: RawTask) -> ResultHandle<R> {
        ResultHandle {
            raw,
            _p: PhantomData,
        }
    }

    fn output(&self) -> *mut Output<R> {
        let cell = self.raw.header_ptr().cast::<ResultCell<R>>();
        unsafe { (*cell.as_ptr()).output.get() }
    }

    /// Stores the value and publishes `COMPLETED`, then drains continuations.
    ///
    /// Safety: caller is the executing/settling thread; no terminal state has
    /// been published yet.
    pub(crate) unsafe fn finish(&self, value: R) {
        *self.output() = Output::Finished(value);
        self.raw.header().state.transition_to_completed();
        self.raw.drain_continuations();
    }

    /// Stores the error and publishes `CANCELED`, then drains continuations.
    /// Does not touch any callable; `Harness::cancel_with` handles that for
    /// function-bearing cells.
    ///
    /// Safety: as for `finish`.
    pub(crate) unsafe fn cancel_base(&self, err: TaskError) {
        *self.output() = Output::Faulted(err);
        self.raw.header().state.transition_to_canceled();
        self.raw.drain_continuations();
    }

    /// Moves the outcome out of the slot. Exclusive-handle path: no other
    /// reader may touch the slot afterwards.
    ///
    /// Safety: terminal state observed; sole consumer of the slot.
    pub(crate) unsafe fn take_output(&self) -> Result<R, TaskError> {
        match std::mem::replace(&mut *self.output(), Output::Empty) {
            Output::Finished(value) => Ok(value),
            Output::Faulted(err) => Err(err),
            Output::Empty => unreachable!("task output taken twice"),
        }
    }

    /// Moves a completed value out of the slot.
    ///
    /// Safety: `COMPLETED` observed; sole consumer of the slot.
    pub(crate) unsafe fn take_value(&self) -> R {
        match std::mem::replace(&mut *self.output(), Output::Empty) {
            Output::Finished(value) => value,
            _ => unreachable!("task completed without a value"),
        }
    }

    /// Borrows the outcome. Shared-handle path: the value stays in place for
    /// the node's lifetime, the error is cheap to clone.
    ///
    /// Safety: terminal state observed; no exclusive consumer exists. The
    /// returned lifetime is unbound — the caller must not outlive its own
    /// reference to the cell.
    pub(crate) unsafe fn output_ref<'a>(&self) -> Result<&'a R, TaskError> {
        match &*self.output() {
            Output::Finished(value) => Ok(value),
            Output::Faulted(err) => Err(err.clone()),
            Output::Empty => unreachable!("task finished without an outcome"),
        }
    }

    /// Clones the error of a canceled task.
    ///
    /// Safety: `CANCELED` observed.
    pub(crate) unsafe fn clone_error(&self) -> TaskError {
        match &*self.output() {
            Output::Faulted(err) => err.clone(),
            _ => unreachable!("task canceled without an error"),
        }
    }
}

/// Dispatch table. One static instance exists per concrete cell shape,
/// promoted from `vtable()`; the indirection lets heterogeneous cells live in
/// the continuation list and behind uniform refcounted handles.
pub(crate) struct Vtable {
    /// Invokes the stored callable, driving the task to a terminal state.
    pub(super) run: unsafe fn(NonNull<Header>),

    /// Cancels the task with an error, dropping the un-run callable.
    pub(super) cancel: unsafe fn(NonNull<Header>, TaskError),

    /// Submits the task (a continuation) to the scheduler captured in its own
    /// cell. Consumes one reference held by the caller.
    pub(super) schedule: unsafe fn(NonNull<Header>),

    /// Drops the concrete cell. Called when the reference count hits zero.
    pub(super) dealloc: unsafe fn(NonNull<Header>),
}

/// Get the vtable for the requested `F`, `R` and `S` generics.
pub(crate) fn vtable<F, R, S>() -> &'static Vtable
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    &Vtable {
        run: run::<F, R, S>,
        cancel: cancel::<F, R, S>,
        schedule: schedule::<F, R, S>,
        dealloc: dealloc::<F, R, S>,
    }
}

/// Vtable for result-only cells. Event tasks are settled through typed
/// producer handles and are never run or scheduled, so those entries are
/// unreachable by construction.
pub(crate) fn event_vtable<R: Send>() -> &'static Vtable {
    &Vtable {
        run: not_runnable,
        cancel: not_runnable_cancel,
        schedule: not_runnable,
        dealloc: dealloc_event::<R>,
    }
}

unsafe fn run<F, R, S>(ptr: NonNull<Header>)
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    Harness::<F, R, S>::from_raw(ptr).run();
}

unsafe fn cancel<F, R, S>(ptr: NonNull<Header>, err: TaskError)
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    Harness::<F, R, S>::from_raw(ptr).cancel_with(err);
}

unsafe fn schedule<F, R, S>(ptr: NonNull<Header>)
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    Harness::<F, R, S>::from_raw(ptr).schedule_as_continuation();
}

unsafe fn dealloc<F, R, S>(ptr: NonNull<Header>)
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    drop(Box::from_raw(ptr.as_ptr().cast::<TaskCell<F, R, S>>()));
}

unsafe fn dealloc_event<R: Send>(ptr: NonNull<Header>) {
    drop(Box::from_raw(ptr.as_ptr().cast::<ResultCell<R>>()));
}

unsafe fn not_runnable(_: NonNull<Header>) {
    unreachable!("event tasks have no execution function");
}

unsafe fn not_runnable_cancel(_: NonNull<Header>, _: TaskError) {
    unreachable!("event tasks are canceled through their producer handle");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InlineScheduler;
    use crate::task::exec::RootExec;

    #[test]
    fn test_prefix_layout_matches() {
        type Cell = TaskCell<RootExec<fn() -> u64>, u64, InlineScheduler>;

        assert_eq!(std::mem::offset_of!(Cell, header), 0);
        assert_eq!(
            std::mem::offset_of!(Cell, output),
            std::mem::offset_of!(ResultCell<u64>, output),
        );
    }

    #[test]
    fn test_cell_is_cache_line_aligned() {
        type Cell = TaskCell<RootExec<fn() -> u64>, u64, InlineScheduler>;
        assert_eq!(std::mem::align_of::<Cell>(), 128);
    }
}
