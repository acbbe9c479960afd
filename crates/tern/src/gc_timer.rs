//
// gc_timer.rs
//
// Idle trigger for releasing unused caches
//

use std::time::Duration;

use crate::host::{ServerHost, TimerId};

/// Fires once after `delay` of quiet; every new request restarts the wait.
#[derive(Debug)]
pub struct GcTimer {
    delay: Duration,
    pending: Option<TimerId>,
}

impl GcTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn schedule_collect(&mut self, host: &dyn ServerHost) {
        if let Some(timer) = self.pending.take() {
            host.clear_timeout(timer);
        }
        self.pending = Some(host.set_timeout(self.delay));
    }

    /// True when `timer` is the pending collection, which is then consumed.
    pub fn on_timer(&mut self, timer: TimerId) -> bool {
        if self.pending == Some(timer) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self, host: &dyn ServerHost) {
        if let Some(timer) = self.pending.take() {
            host.clear_timeout(timer);
        }
    }
}
