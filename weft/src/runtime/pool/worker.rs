use crate::runtime::pool::Shared;
use crate::runtime::wait::WaitKinds;
use crate::task::{RawTask, ScheduledTask};
use crossbeam_deque::{Stealer, Worker as CbWorker};
use std::cell::RefCell;
use std::iter;
use std::sync::Arc;

thread_local! {
    /// The worker owning the current thread, if it is a pool thread.
    static CURRENT_WORKER: RefCell<Option<Arc<Worker>>> = const { RefCell::new(None) };
}

pub(super) struct Worker {
    index: usize,

    shared: Arc<Shared>,

    /// Local LIFO deque, fed by `schedule_local` from this thread.
    deque: CbWorker<ScheduledTask>,

    /// Handles to all of the other workers' deques. Shuffled so each
    /// worker's search order when stealing is different, to reduce
    /// contention.
    stealers: Vec<Stealer<ScheduledTask>>,
}

// Safety: the deque is only pushed to and popped from the worker's own
// thread (enforced by the `CURRENT_WORKER` lookups); cross-thread access
// goes through the `Stealer` handles, which are thread-safe.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    pub(super) fn new(
        index: usize,
        shared: Arc<Shared>,
        deque: CbWorker<ScheduledTask>,
        mut stealers: Vec<Stealer<ScheduledTask>>,
    ) -> Worker {
        fastrand::shuffle(&mut stealers);
        Worker {
            index,
            shared,
            deque,
            stealers,
        }
    }

    pub(super) fn index(&self) -> usize {
        self.index
    }

    /// Event loop driving this worker until pool shutdown.
    pub(super) fn run(self: Arc<Self>) {
        CURRENT_WORKER.with(|current| *current.borrow_mut() = Some(Arc::clone(&self)));
        tracing::debug!(worker = self.index, "pool worker running");

        loop {
            match self.find_task() {
                Some(task) => task.run(),
                None => {
                    if self.shared.is_shutdown() {
                        break;
                    }
                    self.shared.event(self.index).wait();
                }
            }
        }

        // Run whatever is still queued locally so no registered waiter is
        // stranded; tasks scheduled during the drain keep landing here.
        while let Some(task) = self.deque.pop() {
            task.run();
        }

        CURRENT_WORKER.with(|current| *current.borrow_mut() = None);
        tracing::debug!(worker = self.index, "pool worker stopped");
    }

    /// Pops local work first (hot in cache, and the partitioner's join
    /// target), then batches from the injector, then steals from peers.
    fn find_task(&self) -> Option<ScheduledTask> {
        self.deque.pop().or_else(|| {
            iter::repeat_with(|| {
                self.shared
                    .injector()
                    .steal_batch_and_pop(&self.deque)
                    .or_else(|| self.stealers.iter().map(|s| s.steal()).collect())
            })
            .find(|steal| !steal.is_retry())
            .and_then(|steal| steal.success())
        })
    }

    /// Cooperative blocking join: keep executing queued tasks while `raw` is
    /// unfinished, parking only when there is nothing to run. The awaited
    /// task signals `TASK_FINISHED` on this worker's event; new work signals
    /// `TASK_AVAILABLE`.
    fn wait_on(&self, raw: RawTask) {
        let event = self.shared.event(self.index);
        crate::task::attach_signal(raw, Arc::clone(event));

        loop {
            if raw.ready() {
                return;
            }
            if let Some(task) = self.find_task() {
                task.run();
                continue;
            }
            // A finish signal (possibly stale, from an earlier join that
            // returned through the ready check) must loop back to the
            // readiness test rather than be swallowed by the park below.
            if event.try_wait(WaitKinds::TASK_FINISHED) {
                continue;
            }
            event.wait();
        }
    }
}

/// Pushes `task` onto the current thread's worker deque if the thread
/// belongs to pool `pool_id`; hands the task back otherwise.
pub(super) fn try_push_local(pool_id: u64, task: ScheduledTask) -> Result<(), ScheduledTask> {
    CURRENT_WORKER.with(|current| match &*current.borrow() {
        Some(worker) if worker.shared.pool_id() == pool_id => {
            worker.deque.push(task);
            Ok(())
        }
        _ => Err(task),
    })
}

/// Blocks on `raw` cooperatively if the current thread is a pool worker.
/// Returns false from non-worker threads, which park on a plain wait event
/// instead.
pub(crate) fn wait_cooperatively(raw: RawTask) -> bool {
    let worker = CURRENT_WORKER.with(|current| current.borrow().clone());
    match worker {
        Some(worker) => {
            worker.wait_on(raw);
            true
        }
        None => false,
    }
}
