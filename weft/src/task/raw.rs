#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::Header;
use crate::task::error::TaskError;
use crate::task::state::State;
use std::ptr::NonNull;
use std::sync::atomic::{Ordering, fence};

/// Type-erased handle to a task cell.
///
/// `RawTask` is a bare pointer: it carries no ownership of its own. Callers
/// track which references they hold and pair every `ref_inc` (or reference
/// received from a constructor) with exactly one `drop_reference`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawTask {
    ptr: NonNull<Header>,
}

impl RawTask {
    /// Safety: `ptr` must point to the `Header` of a live task cell.
    pub(super) unsafe fn from_raw(ptr: NonNull<Header>) -> RawTask {
        RawTask { ptr }
    }

    pub(crate) fn header_ptr(&self) -> NonNull<Header> {
        self.ptr
    }

    pub(crate) fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn state(&self) -> &State {
        &self.header().state
    }

    /// Whether the task reached a terminal state, with an acquire barrier if
    /// it did.
    pub(crate) fn ready(&self) -> bool {
        self.state().ready()
    }

    pub(crate) fn ref_inc(self) {
        self.header().refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases one reference, deallocating the cell when it was the last.
    ///
    /// The decrement uses `Release` and the deallocating thread issues an
    /// `Acquire` fence, so everything done with the cell before any release
    /// happens-before its destruction.
    pub(crate) fn drop_reference(self) {
        if self.header().refs.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            unsafe { (self.header().vtable.dealloc)(self.ptr) }
        }
    }

    /// Invokes the stored callable, driving the task to a terminal state.
    ///
    /// Safety: the caller holds a reference and is the only thread executing
    /// this task.
    pub(crate) unsafe fn run(self) {
        (self.header().vtable.run)(self.ptr);
    }

    /// Cancels a task whose callable never ran.
    ///
    /// Safety: the caller holds a reference and no other thread is executing
    /// or settling this task.
    pub(crate) unsafe fn cancel(self, err: TaskError) {
        (self.header().vtable.cancel)(self.ptr, err);
    }

    /// Registers `cont` to be scheduled when this task finishes, consuming
    /// one of the caller's references to `cont`.
    ///
    /// If the task already finished (the list is sealed), the registrant
    /// schedules the continuation itself; the acquire fence pairs with the
    /// finisher's release store so the parent's outcome is visible to the
    /// continuation wherever it ends up running.
    pub(crate) fn add_continuation(self, cont: RawTask) {
        let snapshot = self.state().load_relaxed();
        if !snapshot.is_finished() && self.header().continuations.try_add(cont) {
            return;
        }

        fence(Ordering::Acquire);
        unsafe { (cont.header().vtable.schedule)(cont.ptr) }
    }

    /// Runs all of the task's continuations after it completed or canceled.
    /// The list is emptied and sealed so no further continuations can be
    /// added; each entry's reference moves to its scheduler.
    pub(crate) fn drain_continuations(self) {
        self.header().continuations.flush_and_lock(|cont| unsafe {
            (cont.header().vtable.schedule)(cont.ptr)
        });
    }
}

// Safety: the cell is shared state governed by the state machine, the
// continuation-list protocol and the reference count; the pointer itself may
// move freely between threads.
unsafe impl Send for RawTask {}
unsafe impl Sync for RawTask {}
