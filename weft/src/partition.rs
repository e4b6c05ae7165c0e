//! Recursive range partitioning for parallel iteration.
//!
//! [`parallel_for`] splits a range in half until the pieces reach the grain
//! size, spawning one half of every split into the current worker's local
//! queue and recursing into the other inline, then joining. The local-queue
//! requirement ([`LocalSchedule`]) is what keeps the recursion live: a worker
//! blocked on a join pops the spawned half out of its own deque and runs it.

use crate::runtime::LocalSchedule;
use crate::task::local_spawn_unchecked;
use crate::utils::ScopeGuard;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::thread;

/// A splittable `usize` range with a grain size.
///
/// The grain bounds how small a piece gets before it is executed serially.
/// The default grain targets roughly eight pieces per CPU core, enough slack
/// for stealing to balance uneven work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRange {
    start: usize,
    end: usize,
    grain: usize,
}

impl IndexRange {
    pub fn new(range: Range<usize>) -> IndexRange {
        let grain = auto_grain(range.end.saturating_sub(range.start));
        IndexRange::with_grain(range, grain)
    }

    /// A range with an explicit grain. A zero grain is treated as one.
    pub fn with_grain(range: Range<usize>, grain: usize) -> IndexRange {
        IndexRange {
            start: range.start,
            end: range.end.max(range.start),
            grain: grain.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Splits off the upper half, keeping the lower half in `self`. Returns
    /// `None` once the range is at or below the grain.
    fn split(&mut self) -> Option<IndexRange> {
        if self.len() <= self.grain {
            return None;
        }

        let mid = self.start + self.len() / 2;
        let upper = IndexRange {
            start: mid,
            end: self.end,
            grain: self.grain,
        };
        self.end = mid;
        Some(upper)
    }
}

impl From<Range<usize>> for IndexRange {
    fn from(range: Range<usize>) -> IndexRange {
        IndexRange::new(range)
    }
}

fn auto_grain(len: usize) -> usize {
    let threads = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    (len / (8 * threads)).max(1)
}

/// Runs `func` for each index in `range`, in parallel on `scheduler`.
///
/// Every index is visited exactly once; the call returns when all of them
/// have been. A panic from `func` is re-raised on the caller once the other
/// pieces have quiesced. The scheduler must support local spawning (see
/// module docs); [`InlineScheduler`](crate::runtime::InlineScheduler)
/// degrades to a serial loop.
pub fn parallel_for<S, F>(scheduler: &S, range: impl Into<IndexRange>, func: F)
where
    S: LocalSchedule,
    F: Fn(usize) + Sync,
{
    let range = range.into();
    if range.is_empty() {
        return;
    }
    drive(scheduler, range, &func);
}

fn drive<S, F>(scheduler: &S, mut range: IndexRange, func: &F)
where
    S: LocalSchedule,
    F: Fn(usize) + Sync,
{
    let Some(upper) = range.split() else {
        for index in range.start..range.end {
            func(index);
        }
        return;
    };

    let job = SpawnedHalf {
        scheduler: scheduler as *const S,
        func: func as *const F,
        range: upper,
    };

    // Safety: the spawned half is joined before this frame returns (the
    // guard waits even on unwind), so the raw borrows in `job` stay valid.
    let task = unsafe { local_spawn_unchecked(scheduler, move || job.run()) };

    {
        let mut guard = ScopeGuard::new(|| task.wait());
        drive(scheduler, range, func);
        guard.disarm();
    }

    if let Err(err) = task.get() {
        err.resume();
    }
}

/// The upper half of a split, shipped to the local queue as raw borrows of
/// the caller's scheduler and callable.
struct SpawnedHalf<S, F> {
    scheduler: *const S,
    func: *const F,
    range: IndexRange,
}

// Safety: the referents are `Sync` and outlive the task (joined before the
// spawning frame returns).
unsafe impl<S: Sync, F: Sync> Send for SpawnedHalf<S, F> {}

impl<S, F> SpawnedHalf<S, F>
where
    S: LocalSchedule,
    F: Fn(usize) + Sync,
{
    fn run(self) {
        // Safety: see `Send` above.
        let (scheduler, func) = unsafe { (&*self.scheduler, &*self.func) };
        drive(scheduler, self.range, func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::pool::Builder;
    use crate::runtime::InlineScheduler;
    use anyhow::Result;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    #[test]
    fn test_split_halves_until_grain() {
        let mut range = IndexRange::with_grain(0..8, 2);
        let upper = range.split().unwrap();
        assert_eq!(range, IndexRange::with_grain(0..4, 2));
        assert_eq!(upper, IndexRange::with_grain(4..8, 2));

        let mut leaf = IndexRange::with_grain(0..2, 2);
        assert!(leaf.split().is_none());
    }

    #[test]
    fn test_inline_scheduler_degrades_to_serial() {
        let hits: Vec<AtomicUsize> = (0..16).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(&InlineScheduler, IndexRange::with_grain(0..16, 4), |i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        });
        for hit in &hits {
            assert_eq!(hit.load(Ordering::SeqCst), 1);
        }
    }

    #[rstest]
    #[case::one_worker(1)]
    #[case::four_workers(4)]
    fn test_parallel_sum(#[case] workers: usize) -> Result<()> {
        let pool = Builder::new().worker_threads(workers).try_build()?;
        let sum = Arc::new(AtomicUsize::new(0));

        let sum_ref = Arc::clone(&sum);
        parallel_for(pool.handle(), 0..1000, move |i| {
            sum_ref.fetch_add(i + 1, Ordering::Relaxed);
        });

        // 1 + 2 + ... + 1000
        assert_eq!(sum.load(Ordering::SeqCst), 500_500);
        Ok(())
    }

    #[test]
    fn test_each_index_visited_exactly_once() -> Result<()> {
        let pool = Builder::new().worker_threads(4).try_build()?;
        let hits: Arc<Vec<AtomicU8>> = Arc::new((0..4096).map(|_| AtomicU8::new(0)).collect());

        let hits_ref = Arc::clone(&hits);
        parallel_for(pool.handle(), IndexRange::with_grain(0..4096, 16), move |i| {
            hits_ref[i].fetch_add(1, Ordering::Relaxed);
        });

        for (i, hit) in hits.iter().enumerate() {
            assert_eq!(hit.load(Ordering::SeqCst), 1, "index {i} visit count");
        }
        Ok(())
    }

    #[test]
    fn test_empty_range_is_a_no_op() -> Result<()> {
        let pool = Builder::new().worker_threads(1).try_build()?;
        parallel_for(pool.handle(), 10..10, |_| unreachable!("empty range"));
        Ok(())
    }

    #[test]
    fn test_repeated_runs_do_not_deadlock() -> Result<()> {
        // More logical subtasks than workers, many times over.
        let pool = Builder::new().worker_threads(2).try_build()?;

        for _ in 0..64 {
            let sum = Arc::new(AtomicUsize::new(0));
            let sum_ref = Arc::clone(&sum);
            parallel_for(pool.handle(), IndexRange::with_grain(0..1000, 8), move |i| {
                sum_ref.fetch_add(i, Ordering::Relaxed);
            });
            assert_eq!(sum.load(Ordering::SeqCst), 499_500);
        }
        Ok(())
    }

    #[test]
    fn test_panic_propagates_after_quiescence() -> Result<()> {
        let pool = Builder::new().worker_threads(2).try_build()?;
        let visited = Arc::new(AtomicUsize::new(0));

        let visited_ref = Arc::clone(&visited);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            parallel_for(pool.handle(), IndexRange::with_grain(0..64, 4), move |i| {
                visited_ref.fetch_add(1, Ordering::Relaxed);
                if i == 31 {
                    panic!("sink failure");
                }
            });
        }));

        assert!(result.is_err());
        // Everything that started has finished; no task outlives the call.
        assert!(visited.load(Ordering::SeqCst) <= 64);
        Ok(())
    }
}
