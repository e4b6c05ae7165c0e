use crate::runtime::{LocalSchedule, Schedule};
use crate::task::ScheduledTask;

/// A scheduler that runs submitted tasks synchronously on the caller.
///
/// Used internally for the unwrap forwarder and the wait-event signal
/// continuations, where the work is a few stores and a notify; also handy in
/// tests. Everything a task does happens before `schedule` returns, which
/// trivially satisfies the local-queue contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Schedule for InlineScheduler {
    fn schedule(&self, task: ScheduledTask) {
        task.run();
    }
}

impl LocalSchedule for InlineScheduler {
    fn schedule_local(&self, task: ScheduledTask) {
        task.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::spawn;

    #[test]
    fn test_inline_scheduler_runs_synchronously() {
        let task = spawn(&InlineScheduler, || 2 + 2);
        assert!(task.is_ready());
        assert_eq!(task.get().unwrap(), 4);
    }
}
