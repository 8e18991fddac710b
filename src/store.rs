//! Single-slot frame cache shared by the acquisition loop and all readers.

use crate::types::Frame;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct Slot {
    frame: Option<Arc<Frame>>,
    seq: u64,
}

/// Holds at most one live frame plus its sequence number.
///
/// Writers publish through an exclusive lock; readers either snapshot the
/// current frame or block on the condition variable until a newer sequence
/// arrives. Sequence numbers strictly increase between publishes and reset
/// only when the transport is reopened.
pub struct FrameStore {
    slot: Mutex<Slot>,
    wakeup: Condvar,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                seq: 0,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Replace the held frame, stamp the next sequence number into it, and
    /// wake all waiters. Returns the published frame.
    pub fn publish(&self, mut frame: Frame) -> Arc<Frame> {
        let mut g = self.slot.lock().expect("lock poisoned");
        g.seq += 1;
        frame.seq = g.seq;
        let published = Arc::new(frame);
        g.frame = Some(Arc::clone(&published));
        self.wakeup.notify_all();
        published
    }

    /// Non-blocking read of whatever is currently held.
    pub fn latest(&self) -> Option<(Arc<Frame>, u64)> {
        let g = self.slot.lock().expect("lock poisoned");
        g.frame.as_ref().map(|f| (Arc::clone(f), g.seq))
    }

    /// Sequence number of the most recent publish, 0 before the first.
    pub fn last_seq(&self) -> u64 {
        self.slot.lock().expect("lock poisoned").seq
    }

    /// Block until a frame with a sequence number greater than `after_seq`
    /// is available, or `timeout` elapses.
    ///
    /// After a reset the counter restarts below any previously observed
    /// sequence, so a waiter keyed to the old session times out and should
    /// re-sync with `latest()`.
    pub fn wait_for_next(&self, after_seq: u64, timeout: Duration) -> Option<(Arc<Frame>, u64)> {
        let mut g = self.slot.lock().expect("lock poisoned");

        if timeout == Duration::ZERO {
            if g.seq > after_seq {
                return g.frame.as_ref().map(|f| (Arc::clone(f), g.seq));
            }
            return None;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if g.seq > after_seq {
                if let Some(frame) = g.frame.as_ref() {
                    return Some((Arc::clone(frame), g.seq));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let remaining = deadline - now;
            let (ng, _) = self
                .wakeup
                .wait_timeout(g, remaining)
                .expect("lock poisoned");
            g = ng;
        }
    }

    /// Clear the slot and restart the sequence counter. Called only on
    /// transport reopen.
    pub fn reset(&self) {
        let mut g = self.slot.lock().expect("lock poisoned");
        g.frame = None;
        g.seq = 0;
        self.wakeup.notify_all();
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}
