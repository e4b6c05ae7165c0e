use super::*;
use crate::runtime::{InlineScheduler, LocalSchedule, Schedule};
use crate::task::{local_spawn, spawn};
use anyhow::Result;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicUsize, Ordering};

assert_impl_all!(Handle: Send, Sync, Schedule, LocalSchedule);
assert_impl_all!(Pool: Send, Sync);

#[test]
fn test_zero_workers_is_rejected() {
    assert!(Builder::new().worker_threads(0).try_build().is_err());
}

#[rstest]
#[case::single(1)]
#[case::pair(2)]
#[case::quad(4)]
fn test_spawned_tasks_all_complete(#[case] workers: usize) -> Result<()> {
    let pool = Builder::new().worker_threads(workers).try_build()?;
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..100usize)
        .map(|i| {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                i
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.get().unwrap(), i);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 100);
    Ok(())
}

#[test]
fn test_worker_joining_a_task_keeps_executing() -> Result<()> {
    // One worker: if the blocked join parked the thread outright, the inner
    // task could never run and this would deadlock.
    let pool = Builder::new().worker_threads(1).try_build()?;
    let handle = pool.handle().clone();

    let outer = pool.spawn(move || {
        let inner = spawn(&handle, || 21);
        inner.get().unwrap() * 2
    });

    assert_eq!(outer.get().unwrap(), 42);
    Ok(())
}

#[test]
fn test_local_spawn_joins_on_worker() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;
    let handle = pool.handle().clone();

    let outer = pool.spawn(move || {
        let left = local_spawn(&handle, || 20);
        let right = local_spawn(&handle, || 22);
        left.get().unwrap() + right.get().unwrap()
    });

    assert_eq!(outer.get().unwrap(), 42);
    Ok(())
}

#[test]
fn test_local_spawn_from_foreign_thread_falls_back() -> Result<()> {
    let pool = Builder::new().worker_threads(1).try_build()?;

    // The test thread is not a pool worker; the task must still run.
    let task = local_spawn(pool.handle(), || 7);
    assert_eq!(task.get().unwrap(), 7);
    Ok(())
}

#[test]
fn test_continuations_ride_the_pool() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;
    let handle = pool.handle();

    let task = spawn(handle, || 1)
        .then(handle, |v| v + 1)
        .then(handle, |v| v * 3);
    assert_eq!(task.get().unwrap(), 6);
    Ok(())
}

#[test]
fn test_continuation_scheduler_can_differ_from_parents() -> Result<()> {
    let pool = Builder::new().worker_threads(1).try_build()?;

    let task = spawn(pool.handle(), || 10).then(&InlineScheduler, |v| v + 1);
    assert_eq!(task.get().unwrap(), 11);
    Ok(())
}

#[test]
fn test_shutdown_completes_pending_tasks() -> Result<()> {
    let tasks: Vec<_> = {
        let pool = Builder::new().worker_threads(2).try_build()?;
        (0..50usize).map(|i| pool.spawn(move || i)).collect()
        // Pool dropped here; workers drain before exiting.
    };

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.get().unwrap(), i);
    }
    Ok(())
}

#[test]
fn test_schedule_after_shutdown_runs_inline() -> Result<()> {
    let handle = {
        let pool = Builder::new().worker_threads(1).try_build()?;
        pool.handle().clone()
    };

    let task = spawn(&handle, || 3);
    assert!(task.is_ready());
    assert_eq!(task.get().unwrap(), 3);
    Ok(())
}

#[test]
fn test_recursive_fork_join_does_not_deadlock() -> Result<()> {
    // More forks than workers; liveness depends on blocked joins draining
    // the local deques.
    fn fork_sum(handle: &Handle, lo: usize, hi: usize) -> usize {
        if hi - lo <= 4 {
            return (lo..hi).sum();
        }
        let mid = lo + (hi - lo) / 2;
        let handle_clone = handle.clone();
        let upper = local_spawn(handle, move || fork_sum(&handle_clone, mid, hi));
        let lower = fork_sum(handle, lo, mid);
        lower + upper.get().unwrap()
    }

    let pool = Builder::new().worker_threads(2).try_build()?;
    let handle = pool.handle().clone();
    let task = pool.spawn(move || fork_sum(&handle, 0, 256));
    assert_eq!(task.get().unwrap(), (0..256).sum::<usize>());
    Ok(())
}

#[test]
fn test_terminal_state_publishes_prior_writes() -> Result<()> {
    let pool = Builder::new().worker_threads(2).try_build()?;

    for _ in 0..64 {
        let side = Arc::new(AtomicUsize::new(0));
        let side_writer = Arc::clone(&side);
        let task = pool.spawn(move || side_writer.store(42, Ordering::Relaxed));
        task.wait();

        // Relaxed is enough on both ends: observing the terminal state is
        // what carries the happens-before edge.
        assert_eq!(side.load(Ordering::Relaxed), 42);
    }
    Ok(())
}

#[test]
fn test_panics_surface_through_handles_not_workers() -> Result<()> {
    let pool = Builder::new().worker_threads(1).try_build()?;

    let failed = pool.spawn(|| -> u32 { panic!("worker-side boom") });
    assert!(failed.get().unwrap_err().is_panic());

    // The worker survived the panic and keeps serving tasks.
    let ok = pool.spawn(|| 1);
    assert_eq!(ok.get().unwrap(), 1);
    Ok(())
}
