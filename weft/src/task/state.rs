use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const LOCKED: u8 = 1;
const UNWRAPPED: u8 = 2;
const COMPLETED: u8 = 3;
const CANCELED: u8 = 4;

/// Lifecycle state of a task, packed into a single atomic byte.
///
/// Legal transitions:
///
/// ```text
/// PENDING -> COMPLETED | CANCELED | UNWRAPPED
/// PENDING -> LOCKED -> COMPLETED | CANCELED      (event tasks only)
/// UNWRAPPED -> COMPLETED | CANCELED
/// ```
///
/// `COMPLETED` and `CANCELED` are terminal and sticky. The store that
/// publishes a terminal state uses `Release`; any reader that observes a
/// terminal state through an `Acquire` load also observes the output slot
/// written before it.
///
/// Ownership is tracked separately by the reference count in `Header`; this
/// byte only carries the lifecycle. No compare-and-swap is needed for the
/// terminal transitions because only the executing thread touches the state
/// between `PENDING` and terminal. The one exception is `try_lock`, used by
/// event tasks to serialize racing producers.
pub(crate) struct State(AtomicU8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snapshot(u8);

impl State {
    pub(crate) fn new() -> State {
        State(AtomicU8::new(PENDING))
    }

    /// Loads the state with `Acquire`, pairing with the terminal `Release`
    /// store so the output slot is visible once a terminal state is seen.
    pub(crate) fn load(&self) -> Snapshot {
        Snapshot(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn load_relaxed(&self) -> Snapshot {
        Snapshot(self.0.load(Ordering::Relaxed))
    }

    /// Whether the task reached a terminal state, with an acquire barrier if
    /// it did.
    pub(crate) fn ready(&self) -> bool {
        self.load().is_finished()
    }

    /// Publishes a successful result. The output slot must already hold the
    /// value.
    pub(crate) fn transition_to_completed(&self) {
        debug_assert!(!self.load_relaxed().is_finished(), "terminal state stored twice");
        self.0.store(COMPLETED, Ordering::Release);
    }

    /// Publishes a failure. The output slot must already hold the error.
    pub(crate) fn transition_to_canceled(&self) {
        debug_assert!(!self.load_relaxed().is_finished(), "terminal state stored twice");
        self.0.store(CANCELED, Ordering::Release);
    }

    /// Marks the task as waiting on an inner task whose outcome will become
    /// its own. Relaxed is enough: until the terminal transition the state is
    /// only read to distinguish finished from not-finished, and `UNWRAPPED`
    /// is not finished.
    pub(crate) fn transition_to_unwrapped(&self) {
        debug_assert!(self.load_relaxed().is_pending());
        self.0.store(UNWRAPPED, Ordering::Relaxed);
    }

    /// One-shot exclusion for event-task producers. Succeeds for exactly one
    /// caller; a failure means the task was already locked or settled.
    pub(crate) fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(PENDING, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl Snapshot {
    pub(crate) fn is_pending(self) -> bool {
        self.0 == PENDING
    }

    pub(crate) fn is_unwrapped(self) -> bool {
        self.0 == UNWRAPPED
    }

    pub(crate) fn is_completed(self) -> bool {
        self.0 == COMPLETED
    }

    pub(crate) fn is_canceled(self) -> bool {
        self.0 == CANCELED
    }

    pub(crate) fn is_finished(self) -> bool {
        self.0 == COMPLETED || self.0 == CANCELED
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("State").field(&self.load_relaxed()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_pending() {
        let state = State::new();
        assert!(state.load().is_pending());
        assert!(!state.ready());
    }

    #[test]
    fn test_terminal_states_are_finished() {
        let state = State::new();
        state.transition_to_completed();
        assert!(state.ready());
        assert!(state.load().is_completed());
        assert!(!state.load().is_canceled());

        let state = State::new();
        state.transition_to_canceled();
        assert!(state.ready());
        assert!(state.load().is_canceled());
    }

    #[test]
    fn test_unwrapped_is_not_finished() {
        let state = State::new();
        state.transition_to_unwrapped();
        assert!(!state.ready());
        assert!(state.load().is_unwrapped());
        state.transition_to_completed();
        assert!(state.ready());
    }

    #[test]
    fn test_try_lock_is_one_shot() {
        let state = State::new();
        assert!(state.try_lock());
        assert!(!state.try_lock());
        state.transition_to_completed();
        assert!(!state.try_lock());
    }
}
