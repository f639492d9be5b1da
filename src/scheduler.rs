//! Timer queue backing `sleep` and `schedule`.
//!
//! The evaluator is single-threaded and cooperative: deferred work runs only
//! when an `await` suspends evaluation or when the program drains its queue
//! before exiting. The scheduler itself is a plain ordered task list; the
//! interpreter drives it.

use std::time::{Duration, Instant};

use crate::value::Value;

pub struct ScheduledTask {
    pub id: u64,
    pub due: Instant,
    pub callee: Value,
    pub args: Vec<Value>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    /// Registers a deferred invocation and returns its timer id.
    pub fn schedule(&mut self, delay_ms: f64, callee: Value, args: Vec<Value>) -> u64 {
        self.next_id += 1;
        let delay = Duration::from_millis(delay_ms.max(0.0) as u64);
        self.tasks.push(ScheduledTask {
            id: self.next_id,
            due: Instant::now() + delay,
            callee,
            args,
        });
        self.next_id
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The earliest deadline in the queue.
    pub fn next_due(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.due).min()
    }

    /// Removes and returns every task due at or before `now`, earliest
    /// first.
    pub fn take_due(&mut self, now: Instant) -> Vec<ScheduledTask> {
        let mut due: Vec<ScheduledTask> = Vec::new();
        let mut remaining = Vec::new();
        for task in self.tasks.drain(..) {
            if task.due <= now {
                due.push(task);
            } else {
                remaining.push(task);
            }
        }
        self.tasks = remaining;
        due.sort_by_key(|t| t.due);
        due
    }
}
