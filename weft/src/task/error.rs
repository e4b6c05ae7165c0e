use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Why a task was canceled.
///
/// One failure can fan out to any number of value continuations and shared
/// waiters, so the error is cheaply cloneable: clones share the same
/// underlying cause. The original panic payload is kept alongside the
/// rendered message and can be extracted once, by the first caller of
/// [`try_into_panic`](TaskError::try_into_panic).
#[derive(Clone)]
pub struct TaskError {
    repr: Arc<Repr>,
}

#[derive(thiserror::Error)]
enum Repr {
    /// The task's callable panicked, or a producer stored a failure.
    #[error("task panicked: {message}")]
    Panic {
        payload: Mutex<Option<PanicPayload>>,
        message: Box<str>,
    },

    /// An event task was settled twice.
    #[error("event task already settled")]
    AlreadySet,

    /// An event task's producer was dropped without settling it.
    #[error("event task abandoned by its producer")]
    Abandoned,
}

impl TaskError {
    pub(crate) fn panic(payload: PanicPayload) -> TaskError {
        let message = panic_payload_as_str(payload.as_ref())
            .unwrap_or("unknown panic payload")
            .into();
        TaskError {
            repr: Arc::new(Repr::Panic {
                payload: Mutex::new(Some(payload)),
                message,
            }),
        }
    }

    /// Builds the error an event-task producer stores through `set_error`.
    pub(crate) fn failure(payload: impl Any + Send + 'static) -> TaskError {
        TaskError::panic(Box::new(payload))
    }

    pub(crate) fn already_set() -> TaskError {
        TaskError {
            repr: Arc::new(Repr::AlreadySet),
        }
    }

    pub(crate) fn abandoned() -> TaskError {
        TaskError {
            repr: Arc::new(Repr::Abandoned),
        }
    }

    /// True if the task was canceled by a panic (or a stored failure value).
    pub fn is_panic(&self) -> bool {
        matches!(&*self.repr, Repr::Panic { .. })
    }

    /// True if this error came from settling an event task twice.
    pub fn is_already_set(&self) -> bool {
        matches!(&*self.repr, Repr::AlreadySet)
    }

    /// True if the event task's producer was dropped without settling it.
    pub fn is_abandoned(&self) -> bool {
        matches!(&*self.repr, Repr::Abandoned)
    }

    /// Takes the original panic payload out of the error. Only the first
    /// caller across all clones receives it.
    pub fn try_into_panic(self) -> Result<PanicPayload, TaskError> {
        let taken = match &*self.repr {
            Repr::Panic { payload, .. } => payload.lock().take(),
            _ => None,
        };
        taken.ok_or(self)
    }

    /// Re-raises the failure on the calling thread: the original payload when
    /// it is still available, the rendered message otherwise.
    pub fn resume(self) -> ! {
        match self.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(err) => std::panic::resume_unwind(Box::new(err.to_string())),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.repr, f)
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskError({})", self.repr)
    }
}

impl fmt::Debug for Repr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl PartialEq for TaskError {
    fn eq(&self, other: &Self) -> bool {
        match (&*self.repr, &*other.repr) {
            (Repr::Panic { message: a, .. }, Repr::Panic { message: b, .. }) => a == b,
            (Repr::AlreadySet, Repr::AlreadySet) => true,
            (Repr::Abandoned, Repr::Abandoned) => true,
            _ => false,
        }
    }
}

impl std::error::Error for TaskError {}

/// Best-effort rendering of a panic payload, which is almost always a
/// `&'static str` or a `String`.
pub(crate) fn panic_payload_as_str(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(TaskError: Send, Sync, Clone, std::error::Error);

    #[test]
    fn test_panic_message_rendering() {
        let err = TaskError::panic(Box::new("boom"));
        assert!(err.is_panic());
        assert_eq!(err.to_string(), "task panicked: boom");

        let err = TaskError::panic(Box::new(String::from("owned boom")));
        assert_eq!(err.to_string(), "task panicked: owned boom");

        let err = TaskError::panic(Box::new(42u32));
        assert_eq!(err.to_string(), "task panicked: unknown panic payload");
    }

    #[test]
    fn test_payload_extracted_once_across_clones() {
        let err = TaskError::panic(Box::new("boom"));
        let clone = err.clone();

        let payload = clone.try_into_panic().expect("first take wins");
        assert_eq!(*payload.downcast::<&str>().unwrap(), "boom");

        // The clone shares the cause; the payload is gone.
        let err = err.try_into_panic().unwrap_err();
        assert!(err.is_panic());
    }

    #[test]
    fn test_kinds_are_distinguishable() {
        assert!(TaskError::already_set().is_already_set());
        assert!(TaskError::abandoned().is_abandoned());
        assert_ne!(TaskError::already_set(), TaskError::abandoned());
        assert_eq!(
            TaskError::panic(Box::new("x")),
            TaskError::panic(Box::new("x"))
        );
    }
}
