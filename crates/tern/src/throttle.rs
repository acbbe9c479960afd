//
// throttle.rs
//
// Keyed debounce over host timers
//

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use crate::host::{ServerHost, TimerId};

/// At most one pending timer per key.
///
/// Scheduling a key that already has a pending timer clears it and starts a
/// new full delay, so a burst of schedules fires once, `delay` after the
/// last one.
#[derive(Debug)]
pub struct ThrottledOperations<K> {
    pending: HashMap<K, TimerId>,
    by_timer: HashMap<TimerId, K>,
}

impl<K> Default for ThrottledOperations<K> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            by_timer: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash + Debug> ThrottledOperations<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, host: &dyn ServerHost, key: K, delay: Duration) -> TimerId {
        // Cancel existing pending work for this key
        if let Some(old) = self.pending.remove(&key) {
            host.clear_timeout(old);
            self.by_timer.remove(&old);
        }
        let timer = host.set_timeout(delay);
        log::trace!("Scheduled {:?} in {:?} ({:?})", key, delay, timer);
        self.pending.insert(key.clone(), timer);
        self.by_timer.insert(timer, key);
        timer
    }

    pub fn cancel(&mut self, host: &dyn ServerHost, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(timer) => {
                host.clear_timeout(timer);
                self.by_timer.remove(&timer);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self, host: &dyn ServerHost) {
        for (_, timer) in self.pending.drain() {
            host.clear_timeout(timer);
        }
        self.by_timer.clear();
    }

    /// Claim a fired timer. Returns the key it was scheduled for, or `None`
    /// when the timer is not ours or was superseded.
    pub fn on_timer(&mut self, timer: TimerId) -> Option<K> {
        let key = self.by_timer.remove(&timer)?;
        self.pending.remove(&key);
        Some(key)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
