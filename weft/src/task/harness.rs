#![allow(unsafe_op_in_unsafe_fn)]

use crate::runtime::Schedule;
use crate::task::error::TaskError;
use crate::task::exec::Exec;
use crate::task::layout::{ResultHandle, TaskCell};
use crate::task::raw::RawTask;
use crate::task::{Header, ScheduledTask};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

/// Typed view of a function-bearing task cell.
///
/// The harness is where the type-erased world of `RawTask` meets the
/// concrete callable, result and scheduler types. It is reconstructed from a
/// header pointer inside the vtable functions.
pub(crate) struct Harness<F, R, S> {
    cell: NonNull<TaskCell<F, R, S>>,
}

impl<F, R, S> Harness<F, R, S>
where
    F: Exec<R, S>,
    R: Send,
    S: Schedule,
{
    /// Safety: `ptr` must be the header of a `TaskCell<F, R, S>`.
    pub(super) unsafe fn from_raw(ptr: NonNull<Header>) -> Harness<F, R, S> {
        Harness { cell: ptr.cast() }
    }

    fn raw(&self) -> RawTask {
        unsafe { RawTask::from_raw(self.cell.cast()) }
    }

    fn cell(&self) -> &TaskCell<F, R, S> {
        unsafe { self.cell.as_ref() }
    }

    /// Takes the callable out of the cell. Requires the executor's mutual
    /// exclusion over the func slot.
    fn take_func(&self) -> Option<F> {
        unsafe { (*self.cell().func.get()).take() }
    }

    /// Invokes the stored callable. The callable itself drives the cell to a
    /// terminal state (`finish`, `cancel_base` or the unwrap protocol); a
    /// panic that escapes it becomes the task's error.
    pub(super) fn run(self) {
        let func = self.take_func().expect("task executed twice");
        let raw = self.raw();

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || func.exec(raw))) {
            self.cancel_with(TaskError::panic(payload));
        }
    }

    /// Cancels the task: drops the un-run callable, stores the error and
    /// publishes `CANCELED`, draining continuations.
    pub(super) fn cancel_with(self, err: TaskError) {
        // The callable's own execution path may have already published a
        // terminal state before unwinding (a panic out of the continuation
        // drain); terminal states are sticky.
        if self.raw().state().load_relaxed().is_finished() {
            return;
        }

        drop(self.take_func());
        unsafe { ResultHandle::<R>::from_raw(self.raw()).cancel_base(err) }
    }

    /// Submits this task (a continuation of a finishing parent) to the
    /// scheduler captured in its cell, consuming one caller reference.
    ///
    /// A scheduler that panics out of `schedule` must not have enqueued the
    /// task; the panic then becomes the continuation's outcome and its own
    /// continuations are drained in turn.
    pub(super) fn schedule_as_continuation(self) {
        let raw = self.raw();

        // Hold a guard reference so the cell outlives a panicking scheduler
        // even if it dropped the task it was handed.
        raw.ref_inc();
        let scheduler = self.cell().scheduler.clone();
        let submitted = panic::catch_unwind(AssertUnwindSafe(|| {
            scheduler.schedule(ScheduledTask::from_raw(raw));
        }));

        if let Err(payload) = submitted {
            unsafe { raw.cancel(TaskError::panic(payload)) }
        }
        raw.drop_reference();
    }
}
