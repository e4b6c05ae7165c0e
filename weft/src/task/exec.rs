//! Execution strategies stored inside task cells.
//!
//! The callable a cell carries is not the bare user closure but one of the
//! wrappers below, which knows how to feed the closure its input (nothing,
//! the parent's value, or the parent handle), what to do when the parent was
//! canceled, and whether the closure's return value is a final result or an
//! inner task to unwrap. `Harness::run` takes the wrapper out of the cell and
//! calls [`Exec::exec`]; everything after that point is the wrapper's job.

use crate::runtime::wait::{WaitEvent, WaitKinds};
use crate::runtime::{InlineScheduler, Schedule};
use crate::task::allocate_task;
use crate::task::error::TaskError;
use crate::task::handle::Task;
use crate::task::layout::ResultHandle;
use crate::task::raw::RawTask;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// An execution strategy for a cell with result type `R` scheduled on `S`.
///
/// `exec` consumes the wrapper and must drive the cell behind `raw` to a
/// terminal state, except by panicking, in which case `Harness::run` cancels
/// the cell with the captured payload.
pub(crate) trait Exec<R, S>: Send + Sized {
    fn exec(self, raw: RawTask);
}

/// What a continuation knows about its parent: how to tell that it was
/// canceled, how to clone its error, and how to extract the value handed to
/// value-style callables. Implemented by `Task` (moves the result out) and
/// `SharedTask` (clones it).
///
/// The state reads here are relaxed: a continuation only executes after its
/// parent's terminal publication, whose visibility was established either by
/// the flusher (release store, same thread as the drain) or by the
/// registrant's acquire fence.
pub(crate) trait ParentHandle: Send {
    type Value: Send;

    fn is_canceled(&self) -> bool;

    fn error(&self) -> TaskError;

    fn into_value(self) -> Self::Value;
}

/// Root task: a nullary callable whose return value is the result.
pub(crate) struct RootExec<F> {
    func: F,
}

impl<F> RootExec<F> {
    pub(crate) fn new(func: F) -> RootExec<F> {
        RootExec { func }
    }
}

impl<F, R, S> Exec<R, S> for RootExec<F>
where
    F: FnOnce() -> R + Send,
    R: Send,
    S: Schedule,
{
    fn exec(self, raw: RawTask) {
        let value = (self.func)();
        unsafe { ResultHandle::<R>::from_raw(raw).finish(value) }
    }
}

/// Value continuation: the callable receives the parent's value. A canceled
/// parent short-circuits — the callable is dropped un-run and the parent's
/// error becomes this task's error.
pub(crate) struct ValueExec<F, P> {
    func: F,
    parent: P,
}

impl<F, P> ValueExec<F, P> {
    pub(crate) fn new(func: F, parent: P) -> ValueExec<F, P> {
        ValueExec { func, parent }
    }
}

impl<F, P, R, S> Exec<R, S> for ValueExec<F, P>
where
    P: ParentHandle,
    F: FnOnce(P::Value) -> R + Send,
    R: Send,
    S: Schedule,
{
    fn exec(self, raw: RawTask) {
        let handle = unsafe { ResultHandle::<R>::from_raw(raw) };
        if self.parent.is_canceled() {
            let err = self.parent.error();
            drop(self.func);
            unsafe { handle.cancel_base(err) }
        } else {
            let value = (self.func)(self.parent.into_value());
            unsafe { handle.finish(value) }
        }
    }
}

/// Value continuation whose callable returns an inner task to unwrap.
pub(crate) struct ValueUnwrapExec<F, P> {
    func: F,
    parent: P,
}

impl<F, P> ValueUnwrapExec<F, P> {
    pub(crate) fn new(func: F, parent: P) -> ValueUnwrapExec<F, P> {
        ValueUnwrapExec { func, parent }
    }
}

impl<F, P, R, S> Exec<R, S> for ValueUnwrapExec<F, P>
where
    P: ParentHandle,
    F: FnOnce(P::Value) -> Task<R> + Send,
    R: Send,
    S: Schedule,
{
    fn exec(self, raw: RawTask) {
        if self.parent.is_canceled() {
            let err = self.parent.error();
            drop(self.func);
            unsafe { ResultHandle::<R>::from_raw(raw).cancel_base(err) }
        } else {
            let child = (self.func)(self.parent.into_value());
            unwrapped_finish(raw, child);
        }
    }
}

/// Task continuation: the callable receives the parent handle itself,
/// whatever state it finished in, and may recover from its failure.
pub(crate) struct TaskExec<F, P> {
    func: F,
    parent: P,
}

impl<F, P> TaskExec<F, P> {
    pub(crate) fn new(func: F, parent: P) -> TaskExec<F, P> {
        TaskExec { func, parent }
    }
}

impl<F, P, R, S> Exec<R, S> for TaskExec<F, P>
where
    P: Send,
    F: FnOnce(P) -> R + Send,
    R: Send,
    S: Schedule,
{
    fn exec(self, raw: RawTask) {
        let value = (self.func)(self.parent);
        unsafe { ResultHandle::<R>::from_raw(raw).finish(value) }
    }
}

/// Task continuation whose callable returns an inner task to unwrap.
pub(crate) struct TaskUnwrapExec<F, P> {
    func: F,
    parent: P,
}

impl<F, P> TaskUnwrapExec<F, P> {
    pub(crate) fn new(func: F, parent: P) -> TaskUnwrapExec<F, P> {
        TaskUnwrapExec { func, parent }
    }
}

impl<F, P, R, S> Exec<R, S> for TaskUnwrapExec<F, P>
where
    P: Send,
    F: FnOnce(P) -> Task<R> + Send,
    R: Send,
    S: Schedule,
{
    fn exec(self, raw: RawTask) {
        let child = (self.func)(self.parent);
        unwrapped_finish(raw, child);
    }
}

/// Ties a parent whose callable returned `child` to the child's outcome.
///
/// The parent moves to `UNWRAPPED` (its own continuations stay registered but
/// unflushed) and a forwarding continuation is installed on the child via the
/// inline scheduler. When the child finishes, the forwarder moves its outcome
/// into the parent and publishes the parent's terminal state, which flushes
/// the parent's continuations.
pub(crate) fn unwrapped_finish<R: Send>(parent: RawTask, child: Task<R>) {
    parent.state().transition_to_unwrapped();

    parent.ref_inc();
    let forward = ForwardExec {
        target: ParentRef::new(parent),
        source: child,
    };

    let child_raw = forward.source.raw();
    let cont = allocate_task::<ForwardExec<R>, (), InlineScheduler>(InlineScheduler, forward, 1);
    child_raw.add_continuation(cont);
}

/// A counted reference to an unwrapped parent, typed by its result.
struct ParentRef<R> {
    raw: RawTask,
    _p: PhantomData<fn() -> R>,
}

impl<R: Send> ParentRef<R> {
    fn new(raw: RawTask) -> ParentRef<R> {
        ParentRef {
            raw,
            _p: PhantomData,
        }
    }

    fn handle(&self) -> ResultHandle<R> {
        unsafe { ResultHandle::from_raw(self.raw) }
    }
}

impl<R> Drop for ParentRef<R> {
    fn drop(&mut self) {
        self.raw.drop_reference();
    }
}

/// The internal continuation installed on an unwrapped child: forwards the
/// child's terminal outcome to the parent.
struct ForwardExec<R> {
    target: ParentRef<R>,
    source: Task<R>,
}

impl<R: Send> Exec<(), InlineScheduler> for ForwardExec<R> {
    fn exec(self, raw: RawTask) {
        let ForwardExec { target, source } = self;
        debug_assert!(target.raw.state().load_relaxed().is_unwrapped());

        let forwarded = panic::catch_unwind(AssertUnwindSafe(|| {
            let src = unsafe { ResultHandle::<R>::from_raw(source.raw()) };
            if source.raw().state().load_relaxed().is_completed() {
                Ok(unsafe { src.take_value() })
            } else {
                Err(unsafe { src.clone_error() })
            }
        }));

        match forwarded {
            Ok(Ok(value)) => unsafe { target.handle().finish(value) },
            Ok(Err(err)) => unsafe { target.handle().cancel_base(err) },
            // Moving or cloning the child's result failed; that failure is
            // the parent's outcome. The parent's callable is long gone, so
            // this bypasses the cancel vtable entry on purpose.
            Err(payload) => unsafe { target.handle().cancel_base(TaskError::panic(payload)) },
        }

        drop(target);
        drop(source);
        unsafe { ResultHandle::<()>::from_raw(raw).finish(()) }
    }
}

/// Continuation installed by blocking waiters: signals a wait event when the
/// awaited task reaches a terminal state.
pub(crate) struct SignalExec {
    event: Arc<WaitEvent>,
}

impl SignalExec {
    pub(crate) fn new(event: Arc<WaitEvent>) -> SignalExec {
        SignalExec { event }
    }
}

impl Exec<(), InlineScheduler> for SignalExec {
    fn exec(self, raw: RawTask) {
        self.event.signal(WaitKinds::TASK_FINISHED);
        unsafe { ResultHandle::<()>::from_raw(raw).finish(()) }
    }
}
