use std::ops::{Index, IndexMut};
use std::time::Instant;

/// Kinds of timeouts needed to run the hub logic
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum Timer {
    /// When to give up on a connect attempt and close the transport
    Connect = 0,
    /// When to ask the transport for a signal-strength reading
    Rssi = 1,
}

/// A table of pending expirations for each distinct kind of `Timer`
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    data: [Option<Instant>; 2],
}

impl TimerTable {
    /// Earliest pending expiration, if any timer is armed
    pub(crate) fn next_timeout(&self) -> Option<Instant> {
        self.data.iter().flatten().min().copied()
    }

    /// Whether `timer` has expired at `now`; expired timers are disarmed
    pub(crate) fn poll(&mut self, timer: Timer, now: Instant) -> bool {
        match self[timer] {
            Some(at) if at <= now => {
                self[timer] = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn stop_all(&mut self) {
        self.data = [None; 2];
    }
}

impl Index<Timer> for TimerTable {
    type Output = Option<Instant>;
    fn index(&self, index: Timer) -> &Option<Instant> {
        &self.data[index as usize]
    }
}

impl IndexMut<Timer> for TimerTable {
    fn index_mut(&mut self, index: Timer) -> &mut Option<Instant> {
        &mut self.data[index as usize]
    }
}
