use crate::task::Task;
use crate::task::error::TaskError;
use crate::task::layout::{ResultCell, ResultHandle};
use crate::task::raw::RawTask;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Creates a task with no execution function, settled externally through the
/// returned producer handle.
///
/// The consumer side is an ordinary [`Task`]: it can be waited on, chained
/// and shared like any other. Continuations registered before and after the
/// settlement both fire exactly once.
pub fn event<T: Send + 'static>() -> (EventTask<T>, Task<T>) {
    let raw = ResultCell::<T>::allocate(2);
    let producer = EventTask {
        raw,
        _p: PhantomData,
    };
    // Safety: the cell was just allocated with result type `T` and two
    // references, one of which moves into each handle.
    let consumer = unsafe { Task::from_raw(raw) };
    (producer, consumer)
}

/// Producer handle of an [`event`] task.
///
/// Settlement is one-shot: the first `set` or `set_error` wins, every later
/// attempt fails with an [already-set](TaskError::is_already_set) error.
/// Racing producers are serialized through the task's lock state. Dropping
/// the producer without settling cancels the task with an
/// [abandoned](TaskError::is_abandoned) error so waiters are released.
pub struct EventTask<T> {
    raw: RawTask,
    _p: PhantomData<T>,
}

unsafe impl<T: Send> Send for EventTask<T> {}
unsafe impl<T: Send> Sync for EventTask<T> {}

impl<T: Send + 'static> EventTask<T> {
    /// Completes the task with `value`, scheduling its continuations and
    /// releasing its waiters.
    pub fn set(&self, value: T) -> Result<(), TaskError> {
        if !self.raw.state().try_lock() {
            return Err(TaskError::already_set());
        }

        // Safety: the lock gives this thread exclusive settlement rights.
        unsafe { ResultHandle::<T>::from_raw(self.raw).finish(value) }
        Ok(())
    }

    /// Cancels the task with a failure payload, analogous to its function
    /// having panicked with `payload`.
    pub fn set_error(&self, payload: impl Any + Send + 'static) -> Result<(), TaskError> {
        if !self.raw.state().try_lock() {
            return Err(TaskError::already_set());
        }

        // Safety: as for `set`.
        unsafe { ResultHandle::<T>::from_raw(self.raw).cancel_base(TaskError::failure(payload)) }
        Ok(())
    }
}

impl<T> Drop for EventTask<T> {
    fn drop(&mut self) {
        // An unsettled task would block its waiters forever.
        if self.raw.state().try_lock() {
            // Safety: the lock gives this thread exclusive settlement rights;
            // the cell's result type is `T` by construction.
            unsafe { ResultHandle::<T>::from_raw(self.raw).cancel_base(TaskError::abandoned()) }
        }
        self.raw.drop_reference();
    }
}

impl<T> fmt::Debug for EventTask<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "EventTask({:p})", self.raw.header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InlineScheduler;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_then_get() {
        let (producer, consumer) = event::<u32>();
        assert!(!consumer.is_ready());
        producer.set(5).unwrap();
        assert!(consumer.is_ready());
        assert_eq!(consumer.get().unwrap(), 5);
    }

    #[test]
    fn test_second_settlement_fails() {
        let (producer, consumer) = event::<u32>();
        producer.set(1).unwrap();
        assert!(producer.set(2).unwrap_err().is_already_set());
        assert!(producer.set_error("nope").unwrap_err().is_already_set());
        assert_eq!(consumer.get().unwrap(), 1);
    }

    #[test]
    fn test_set_error_cancels_consumer() {
        let (producer, consumer) = event::<u32>();
        producer.set_error("boom").unwrap();
        let err = consumer.get().unwrap_err();
        assert!(err.is_panic());
        assert_eq!(err.to_string(), "task panicked: boom");
    }

    #[test]
    fn test_abandoned_producer_releases_waiters() {
        let (producer, consumer) = event::<u32>();
        drop(producer);
        assert!(consumer.get().unwrap_err().is_abandoned());
    }

    #[test]
    fn test_continuations_before_and_after_set_both_fire() {
        let (producer, consumer) = event::<u32>();
        let consumer = consumer.share();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_early = Arc::clone(&hits);
        let early = consumer.then(&InlineScheduler, move |v| {
            hits_early.fetch_add(1, Ordering::SeqCst);
            v
        });

        producer.set(5).unwrap();

        let hits_late = Arc::clone(&hits);
        let late = consumer.then(&InlineScheduler, move |v| {
            hits_late.fetch_add(1, Ordering::SeqCst);
            v
        });

        assert_eq!(early.get().unwrap(), 5);
        assert_eq!(late.get().unwrap(), 5);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_racing_producers_settle_once() {
        for _ in 0..16 {
            let (producer, consumer) = event::<usize>();
            let producer = Arc::new(producer);
            let succeeded = Arc::new(AtomicUsize::new(0));

            let racers: Vec<_> = (0..4)
                .map(|i| {
                    let producer = Arc::clone(&producer);
                    let succeeded = Arc::clone(&succeeded);
                    std::thread::spawn(move || {
                        if producer.set(i).is_ok() {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for racer in racers {
                racer.join().unwrap();
            }

            assert_eq!(succeeded.load(Ordering::SeqCst), 1);
            assert!(consumer.get().unwrap() < 4);
        }
    }
}
