use crate::runtime::pool::worker::Worker;
use crate::runtime::wait::{WaitEvent, WaitKinds};
use crate::runtime::{LocalSchedule, Schedule};
use crate::task::{ScheduledTask, Task};
use anyhow::{Context, Result, anyhow};
use crossbeam_deque::{Injector, Steal, Worker as CbWorker};
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

mod worker;
pub(crate) use worker::wait_cooperatively;

#[cfg(test)]
mod tests;

/// Builds a [`Pool`].
#[derive(Debug)]
pub struct Builder {
    /// The number of worker threads. Defaults to one per CPU core.
    worker_threads: Option<usize>,

    /// Prefix for the names of threads spawned by the pool.
    thread_name_prefix: String,

    /// Stack size for threads spawned by the pool.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            thread_name_prefix: "weft-worker".into(),
            thread_stack_size: None,
        }
    }

    pub fn worker_threads(mut self, n: usize) -> Builder {
        self.worker_threads = Some(n);
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Builder {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn thread_stack_size(mut self, bytes: usize) -> Builder {
        self.thread_stack_size = Some(bytes);
        self
    }

    pub fn try_build(self) -> Result<Pool> {
        let worker_threads = match self.worker_threads {
            Some(0) => return Err(anyhow!("pool needs at least one worker thread")),
            Some(n) => n,
            None => thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        };

        // Crossbeam LIFO deques and their stealers. LIFO keeps a worker on
        // the task it just forked, which is what the partitioner wants.
        let mut deques = Vec::with_capacity(worker_threads);
        let mut stealers = Vec::with_capacity(worker_threads);
        for _ in 0..worker_threads {
            let deque = CbWorker::new_lifo();
            stealers.push(deque.stealer());
            deques.push(deque);
        }

        let shared = Arc::new(Shared {
            pool_id: next_pool_id(),
            injector: Injector::new(),
            events: (0..worker_threads)
                .map(|_| Arc::new(WaitEvent::new()))
                .collect(),
            shutdown: AtomicBool::new(false),
            next_wake: AtomicUsize::new(0),
        });

        // Wait for all threads to be started before accepting work, so every
        // wake signal has a live worker behind it.
        let barrier = Arc::new(Barrier::new(worker_threads + 1));
        let threads = deques
            .into_iter()
            .enumerate()
            .map(|(index, deque)| {
                // Each worker steals from every *other* worker's deque.
                let others = stealers
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != index)
                    .map(|(_, s)| s.clone())
                    .collect::<Vec<_>>();

                let worker = Arc::new(Worker::new(index, Arc::clone(&shared), deque, others));
                spawn_worker_thread(&self, worker, Arc::clone(&barrier))
            })
            .collect::<Result<Vec<_>>>()?;

        barrier.wait();

        Ok(Pool {
            handle: Handle { shared },
            threads: Mutex::new(threads),
        })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

fn spawn_worker_thread(
    builder: &Builder,
    worker: Arc<Worker>,
    barrier: Arc<Barrier>,
) -> Result<thread::JoinHandle<()>> {
    let mut b = thread::Builder::new().name(format!(
        "{}-{}",
        builder.thread_name_prefix,
        worker.index()
    ));
    if let Some(stack_size) = builder.thread_stack_size {
        b = b.stack_size(stack_size);
    }

    b.spawn(move || {
        barrier.wait();
        worker.run();
    })
    .context("failed to spawn worker thread")
}

/// A work-stealing thread pool.
///
/// Each worker owns a LIFO deque fed by [`LocalSchedule::schedule_local`];
/// plain [`Schedule::schedule`] submissions go through a global injector.
/// Idle workers steal from the injector and from each other, and park on
/// their wait event when there is nothing to take. A worker that blocks
/// joining a task keeps draining its queues while it waits, which is what
/// makes fork/join recursion on the pool deadlock-free.
///
/// Dropping the pool joins the workers and runs every task still queued.
/// Submissions made *after* the drop run inline on the submitter;
/// submissions racing the drop itself may be lost — quiesce producers
/// before dropping the pool.
pub struct Pool {
    handle: Handle,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Pool {
    /// The scheduler handle for this pool.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns `func` onto the pool.
    pub fn spawn<F, R>(&self, func: F) -> Task<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        crate::task::spawn(&self.handle, func)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.handle.shared.shutdown.store(true, Ordering::Release);
        self.handle.shared.wake_all();

        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }

        // Whatever is still in the injector must run somewhere or its
        // waiters would block forever; the workers are gone, so that
        // somewhere is here.
        loop {
            match self.handle.shared.injector.steal() {
                Steal::Success(task) => task.run(),
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }

        tracing::debug!(pool_id = self.handle.shared.pool_id, "pool shut down");
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("pool_id", &self.handle.shared.pool_id)
            .field("workers", &self.handle.shared.events.len())
            .finish()
    }
}

/// Cloneable scheduler handle to a [`Pool`].
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    /// Distinguishes this pool's workers from other pools' in thread-local
    /// lookups.
    pool_id: u64,

    /// Global queue for submissions from outside the pool (and for plain
    /// `schedule`).
    injector: Injector<ScheduledTask>,

    /// One wait event per worker, indexed like the workers.
    events: Vec<Arc<WaitEvent>>,

    shutdown: AtomicBool,

    /// Round-robin cursor for waking idle workers.
    next_wake: AtomicUsize,
}

impl Shared {
    pub(super) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(super) fn injector(&self) -> &Injector<ScheduledTask> {
        &self.injector
    }

    pub(super) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub(super) fn event(&self, index: usize) -> &Arc<WaitEvent> {
        &self.events[index]
    }

    fn wake_one(&self) {
        let index = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.events.len();
        self.events[index].signal(WaitKinds::TASK_AVAILABLE);
    }

    fn wake_all(&self) {
        for event in &self.events {
            event.signal(WaitKinds::TASK_AVAILABLE);
        }
    }
}

impl Schedule for Handle {
    fn schedule(&self, task: ScheduledTask) {
        // After shutdown nothing will ever pop the queues; running inline is
        // the only way the task's waiters can make progress.
        if self.shared.is_shutdown() {
            task.run();
            return;
        }

        self.shared.injector.push(task);
        self.shared.wake_one();
    }
}

impl LocalSchedule for Handle {
    /// Push into the submitting worker's own deque. From threads outside
    /// this pool the task goes through the injector instead.
    fn schedule_local(&self, task: ScheduledTask) {
        if self.shared.is_shutdown() {
            task.run();
            return;
        }

        match worker::try_push_local(self.shared.pool_id, task) {
            Ok(()) => self.shared.wake_one(),
            Err(task) => {
                self.shared.injector.push(task);
                self.shared.wake_one();
            }
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("pool_id", &self.shared.pool_id)
            .finish()
    }
}

fn next_pool_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
