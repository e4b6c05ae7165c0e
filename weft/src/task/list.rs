use crate::task::RawTask;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lock-free list of continuations registered against a task.
///
/// The list supports exactly two operations: `try_add`, used by threads
/// registering continuations, and `flush_and_lock`, used once by whichever
/// thread drives the task to a terminal state. Flushing *seals* the list:
/// after the seal, `try_add` fails and the caller schedules the continuation
/// itself. An entry can therefore never be both flushed and run by its
/// registrant, and no registered entry is ever lost.
///
/// Internally this is a Treiber stack whose head is replaced by a sentinel
/// when sealed. Entries come out of the flush in reverse registration order;
/// the ordering is unspecified by contract.
pub(crate) struct ContinuationList {
    head: AtomicPtr<Node>,
}

struct Node {
    task: RawTask,
    next: *mut Node,
}

/// Sentinel marking a sealed list. Address 1 is never returned by the
/// allocator, and the pointer is never dereferenced.
fn sealed() -> *mut Node {
    ptr::without_provenance_mut(1)
}

impl ContinuationList {
    pub(crate) fn new() -> ContinuationList {
        ContinuationList {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Appends `cont` unless the list has been sealed. Returns false iff
    /// sealed, in which case ownership of `cont` stays with the caller.
    ///
    /// The successful CAS uses `Release` so that the flusher, which swaps the
    /// head with `AcqRel`, observes the node and the continuation cell it
    /// points to fully initialized.
    pub(crate) fn try_add(&self, cont: RawTask) -> bool {
        let node = Box::into_raw(Box::new(Node {
            task: cont,
            next: self.head.load(Ordering::Relaxed),
        }));

        loop {
            let head = unsafe { (*node).next };
            if head == sealed() {
                // Already flushed; hand the continuation back.
                drop(unsafe { Box::from_raw(node) });
                return false;
            }

            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(current) => unsafe { (*node).next = current },
            }
        }
    }

    /// Seals the list and invokes `f` exactly once per registered entry, in
    /// unspecified order. Ownership of each entry's reference moves to `f`.
    pub(crate) fn flush_and_lock(&self, mut f: impl FnMut(RawTask)) {
        let mut cursor = self.head.swap(sealed(), Ordering::AcqRel);
        while !cursor.is_null() && cursor != sealed() {
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
            f(node.task);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_sealed(&self) -> bool {
        self.head.load(Ordering::Relaxed) == sealed()
    }
}

impl Drop for ContinuationList {
    fn drop(&mut self) {
        // A task dropped before finishing still owns one reference per
        // registered continuation.
        let mut cursor = *self.head.get_mut();
        while !cursor.is_null() && cursor != sealed() {
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
            node.task.drop_reference();
        }
    }
}

// Safety: entries are owned references moved in and out under the atomic
// head; the nodes themselves are never aliased mutably.
unsafe impl Send for ContinuationList {}
unsafe impl Sync for ContinuationList {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InlineScheduler;
    use crate::task::exec::RootExec;
    use crate::task::{ScheduledTask, allocate_task};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> RawTask {
        let counter = Arc::clone(counter);
        allocate_task::<_, (), InlineScheduler>(
            InlineScheduler,
            RootExec::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            1,
        )
    }

    #[test]
    fn test_flush_runs_each_entry_once() {
        let list = ContinuationList::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            assert!(list.try_add(counting_task(&counter)));
        }

        let mut flushed = 0;
        list.flush_and_lock(|task| {
            flushed += 1;
            ScheduledTask::from_raw(task).run();
        });

        assert_eq!(flushed, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(list.is_sealed());
    }

    #[test]
    fn test_add_after_seal_fails() {
        let list = ContinuationList::new();
        list.flush_and_lock(|_| unreachable!("list was empty"));

        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(&counter);
        assert!(!list.try_add(task));

        // Ownership stayed with us; run it like a registrant would.
        ScheduledTask::from_raw(task).run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_unflushed_entries() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let list = ContinuationList::new();
            assert!(list.try_add(counting_task(&counter)));
        }
        // Never ran, only released.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_racing_adders_never_lose_an_entry() {
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let list = Arc::new(ContinuationList::new());
            let counter = Arc::new(AtomicUsize::new(0));
            let adders: Vec<_> = (0..4)
                .map(|_| {
                    let list = Arc::clone(&list);
                    let counter = Arc::clone(&counter);
                    std::thread::spawn(move || {
                        let task = counting_task(&counter);
                        if !list.try_add(task) {
                            ScheduledTask::from_raw(task).run();
                        }
                    })
                })
                .collect();

            list.flush_and_lock(|task| ScheduledTask::from_raw(task).run());
            for adder in adders {
                adder.join().unwrap();
            }

            // Late adders ran their entry themselves; either way each entry
            // ran exactly once.
            assert_eq!(counter.load(Ordering::SeqCst), 4);
            total.fetch_add(4, Ordering::SeqCst);
        }

        assert_eq!(total.load(Ordering::SeqCst), 32 * 4);
    }
}
