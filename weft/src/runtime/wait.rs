use crate::runtime::pool;
use crate::task::RawTask;
use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

bitflags! {
    /// Events a [`WaitEvent`] can hold.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct WaitKinds: u32 {
        /// The task being waited on has finished.
        const TASK_FINISHED = 1;

        /// The scheduler has work available for the current thread.
        const TASK_AVAILABLE = 2;
    }
}

/// Event object a thread parks on while waiting for a task to finish or for
/// its scheduler to hand it more work.
///
/// Both signals share one event because a parked pool worker reacts to
/// either: a finished join target wakes it to return, newly available work
/// wakes it to help. Schedulers that do not cooperate simply never signal
/// `TASK_AVAILABLE`.
pub(crate) struct WaitEvent {
    mask: Mutex<WaitKinds>,
    cond: Condvar,
}

impl WaitEvent {
    pub(crate) fn new() -> WaitEvent {
        WaitEvent {
            mask: Mutex::new(WaitKinds::empty()),
            cond: Condvar::new(),
        }
    }

    /// Blocks until at least one event is pending, then clears and returns
    /// the pending set.
    pub(crate) fn wait(&self) -> WaitKinds {
        let mut mask = self.mask.lock();
        while mask.is_empty() {
            self.cond.wait(&mut mask);
        }
        std::mem::replace(&mut *mask, WaitKinds::empty())
    }

    /// Clears and reports the intersection of the pending set with `kinds`,
    /// without blocking.
    pub(crate) fn try_wait(&self, kinds: WaitKinds) -> bool {
        let mut mask = self.mask.lock();
        let hit = *mask & kinds;
        mask.remove(hit);
        !hit.is_empty()
    }

    /// Posts `kinds` and wakes one waiter.
    ///
    /// The notify happens while the mutex is held: with an unlocked notify,
    /// a waiter could observe the new bits, return from `wait` and drop the
    /// event before `notify_one` touches the condvar, a use-after-free.
    pub(crate) fn signal(&self, kinds: WaitKinds) {
        let mut mask = self.mask.lock();
        mask.insert(kinds);
        self.cond.notify_one();
    }
}

/// Blocks the calling thread until `raw` reaches a terminal state.
///
/// On a pool worker thread the wait is cooperative: the worker keeps
/// executing queued tasks (including, possibly, the one being awaited)
/// instead of parking outright. Elsewhere the thread parks on a fresh event
/// signaled by a continuation installed on the task.
pub(crate) fn wait_for_task(raw: RawTask) {
    if raw.ready() {
        return;
    }

    if pool::wait_cooperatively(raw) {
        return;
    }

    let event = Arc::new(WaitEvent::new());
    crate::task::attach_signal(raw, Arc::clone(&event));
    while !raw.ready() {
        event.wait();
    }
}
