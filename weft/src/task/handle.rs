use crate::runtime::{InlineScheduler, Schedule, wait};
use crate::task::error::TaskError;
use crate::task::exec::{ParentHandle, TaskExec, TaskUnwrapExec, ValueExec, ValueUnwrapExec};
use crate::task::layout::ResultHandle;
use crate::task::make_continuation;
use crate::task::raw::RawTask;
use std::fmt;
use std::marker::PhantomData;
use std::mem;

/// Exclusive handle to a task producing `T`.
///
/// The handle can block on the task ([`wait`](Self::wait)), consume its
/// outcome ([`get`](Self::get), which moves the result out), or chain
/// continuations onto it. Chaining consumes the handle; the continuation
/// task returned by `then`-style methods is the new head of the chain. For
/// a handle that can be cloned and observed from several places, convert
/// with [`share`](Self::share).
pub struct Task<T> {
    raw: RawTask,
    _p: PhantomData<T>,
}

unsafe impl<T: Send> Send for Task<T> {}
unsafe impl<T: Send> Sync for Task<T> {}

impl<T: Send> Task<T> {
    /// Safety: the cell behind `raw` must produce `T`, and the caller hands
    /// over one reference.
    pub(crate) unsafe fn from_raw(raw: RawTask) -> Task<T> {
        Task {
            raw,
            _p: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> RawTask {
        self.raw
    }

    /// Whether the task already finished, successfully or not.
    pub fn is_ready(&self) -> bool {
        self.raw.ready()
    }

    /// Blocks the calling thread until the task finishes. On a pool worker
    /// thread this executes queued tasks while waiting instead of parking.
    pub fn wait(&self) {
        wait::wait_for_task(self.raw);
    }

    /// Waits for the task and moves its outcome out.
    pub fn get(self) -> Result<T, TaskError> {
        self.wait();
        // Safety: terminal state observed with acquire; an exclusive handle
        // is the slot's only consumer.
        unsafe { ResultHandle::<T>::from_raw(self.raw).take_output() }
    }

    /// Converts into a cloneable handle.
    pub fn share(self) -> SharedTask<T> {
        let raw = self.raw;
        mem::forget(self);
        SharedTask {
            raw,
            _p: PhantomData,
        }
    }
}

impl<T: Send + 'static> Task<T> {
    /// Chains a value continuation: `func` runs with this task's result once
    /// it completes. If this task is canceled, `func` never runs and the
    /// error propagates to the returned task.
    pub fn then<S, F, U>(self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        let parent = self.raw;
        make_continuation(parent, scheduler, ValueExec::new(func, self))
    }

    /// Like [`then`](Self::then), but `func` returns a task whose outcome
    /// becomes the returned task's outcome.
    pub fn then_unwrap<S, F, U>(self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(T) -> Task<U> + Send + 'static,
        U: Send + 'static,
    {
        let parent = self.raw;
        make_continuation(parent, scheduler, ValueUnwrapExec::new(func, self))
    }

    /// Chains a task continuation: `func` receives this handle itself once
    /// the task finishes, in whatever state, and may recover from a
    /// cancellation by inspecting it.
    pub fn then_task<S, F, U>(self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(Task<T>) -> U + Send + 'static,
        U: Send + 'static,
    {
        let parent = self.raw;
        make_continuation(parent, scheduler, TaskExec::new(func, self))
    }

    /// Like [`then_task`](Self::then_task), with the returned inner task
    /// unwrapped.
    pub fn then_task_unwrap<S, F, U>(self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(Task<T>) -> Task<U> + Send + 'static,
        U: Send + 'static,
    {
        let parent = self.raw;
        make_continuation(parent, scheduler, TaskUnwrapExec::new(func, self))
    }
}

impl<T: Send + 'static> Task<Task<T>> {
    /// Collapses a task of a task into the inner task's outcome. An outer
    /// cancellation propagates directly.
    pub fn flatten(self) -> Task<T> {
        self.then_unwrap(&InlineScheduler, |inner| inner)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.raw.drop_reference();
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Task({:p})", self.raw.header())
    }
}

impl<T: Send> ParentHandle for Task<T> {
    type Value = T;

    fn is_canceled(&self) -> bool {
        self.raw.state().load_relaxed().is_canceled()
    }

    fn error(&self) -> TaskError {
        // Safety: only called on a canceled parent.
        unsafe { ResultHandle::<T>::from_raw(self.raw).clone_error() }
    }

    fn into_value(self) -> T {
        // Safety: only called on a completed parent; the exclusive handle is
        // the slot's only consumer.
        unsafe { ResultHandle::<T>::from_raw(self.raw).take_value() }
    }
}

/// Cloneable handle to a task producing `T`.
///
/// All clones observe the same outcome: [`get`](Self::get) returns a shared
/// reference to the result, valid for as long as any handle exists. Value
/// continuations on a shared task receive a clone of the result.
pub struct SharedTask<T> {
    raw: RawTask,
    _p: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for SharedTask<T> {}
unsafe impl<T: Send + Sync> Sync for SharedTask<T> {}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> SharedTask<T> {
        self.raw.ref_inc();
        SharedTask {
            raw: self.raw,
            _p: PhantomData,
        }
    }
}

impl<T: Send + Sync> SharedTask<T> {
    /// Whether the task already finished, successfully or not.
    pub fn is_ready(&self) -> bool {
        self.raw.ready()
    }

    /// Blocks the calling thread until the task finishes.
    pub fn wait(&self) {
        wait::wait_for_task(self.raw);
    }

    /// Waits for the task and borrows its result. The reference stays valid
    /// for the lifetime of this handle; errors are cloned out.
    pub fn get(&self) -> Result<&T, TaskError> {
        self.wait();
        // Safety: terminal state observed with acquire; shared handles never
        // move the result out of the slot.
        unsafe { ResultHandle::<T>::from_raw(self.raw).output_ref() }
    }
}

impl<T: Clone + Send + Sync + 'static> SharedTask<T> {
    /// Chains a value continuation; `func` receives a clone of the result.
    pub fn then<S, F, U>(&self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        make_continuation(self.raw, scheduler, ValueExec::new(func, self.clone()))
    }

    /// Like [`then`](Self::then), with the returned inner task unwrapped.
    pub fn then_unwrap<S, F, U>(&self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(T) -> Task<U> + Send + 'static,
        U: Send + 'static,
    {
        make_continuation(self.raw, scheduler, ValueUnwrapExec::new(func, self.clone()))
    }
}

impl<T: Send + Sync + 'static> SharedTask<T> {
    /// Chains a task continuation: `func` receives a handle to this task in
    /// whatever state it finished.
    pub fn then_task<S, F, U>(&self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(SharedTask<T>) -> U + Send + 'static,
        U: Send + 'static,
    {
        make_continuation(self.raw, scheduler, TaskExec::new(func, self.clone()))
    }

    /// Like [`then_task`](Self::then_task), with the returned inner task
    /// unwrapped.
    pub fn then_task_unwrap<S, F, U>(&self, scheduler: &S, func: F) -> Task<U>
    where
        S: Schedule,
        F: FnOnce(SharedTask<T>) -> Task<U> + Send + 'static,
        U: Send + 'static,
    {
        make_continuation(self.raw, scheduler, TaskUnwrapExec::new(func, self.clone()))
    }
}

impl<T> Drop for SharedTask<T> {
    fn drop(&mut self) {
        self.raw.drop_reference();
    }
}

impl<T> fmt::Debug for SharedTask<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "SharedTask({:p})", self.raw.header())
    }
}

impl<T: Clone + Send + Sync> ParentHandle for SharedTask<T> {
    type Value = T;

    fn is_canceled(&self) -> bool {
        self.raw.state().load_relaxed().is_canceled()
    }

    fn error(&self) -> TaskError {
        // Safety: only called on a canceled parent.
        unsafe { ResultHandle::<T>::from_raw(self.raw).clone_error() }
    }

    fn into_value(self) -> T {
        // Safety: only called on a completed parent; shared handles never
        // move the result out.
        match unsafe { ResultHandle::<T>::from_raw(self.raw).output_ref() } {
            Ok(value) => value.clone(),
            Err(_) => unreachable!("value requested from a canceled task"),
        }
    }
}
