//! Flush thread state.
//!
//! The flush thread sleeps on a condition variable with a short timeout
//! whenever a pass over the queue finds nothing to do. Writers signal it
//! when they enqueue work; shutdown sets `reqstop`, signals, and joins.

use parking_lot::{Condvar, Mutex};

/// Flush thread lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Unstarted,
    Started,
    Stopped,
}

pub(crate) struct FlusherState {
    pub sleeping: bool,
    pub reqstop: bool,
    pub run: RunState,
}

pub(crate) struct Flusher {
    pub state: Mutex<FlusherState>,
    pub cond: Condvar,
}

impl Flusher {
    pub(crate) fn new() -> Self {
        Flusher {
            state: Mutex::new(FlusherState {
                sleeping: false,
                reqstop: false,
                run: RunState::Unstarted,
            }),
            cond: Condvar::new(),
        }
    }

    /// Wake the flush thread if it is sleeping.
    pub(crate) fn wakeup(&self) {
        let state = self.state.lock();
        if state.sleeping {
            self.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let flusher = Flusher::new();
        let state = flusher.state.lock();
        assert_eq!(state.run, RunState::Unstarted);
        assert!(!state.sleeping);
        assert!(!state.reqstop);
    }

    #[test]
    fn test_wakeup_when_not_sleeping_is_noop() {
        let flusher = Flusher::new();
        flusher.wakeup();
    }
}
