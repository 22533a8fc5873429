//! Hand-off between the notify callback and the dispatcher thread.
//!
//! The callback must never block: the dispatcher registers new watches while
//! events are arriving, and notify answers those registrations from the same
//! thread that runs the callback. Events go into a bounded channel; once it
//! is full they spill into a side buffer, and keep spilling until the
//! dispatcher has drained it, so arrival order is preserved.
//!
//! The side buffer is capped. Past the cap new events are dropped and
//! counted; the dispatcher reports the count as a monitor error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

pub(super) type RawEvent = notify::Result<notify::Event>;

/// Most events held in the side buffer at once.
const SPILL_LIMIT: usize = 64 * 1024;

pub(super) struct EventQueue {
    sender: Sender<RawEvent>,
    spill: Mutex<VecDeque<RawEvent>>,
    spill_limit: usize,
    dropped: AtomicUsize,
}

impl EventQueue {
    pub(super) fn new(capacity: usize) -> (Self, Receiver<RawEvent>) {
        Self::with_spill_limit(capacity, SPILL_LIMIT)
    }

    fn with_spill_limit(capacity: usize, spill_limit: usize) -> (Self, Receiver<RawEvent>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let queue = Self {
            sender,
            spill: Mutex::new(VecDeque::new()),
            spill_limit,
            dropped: AtomicUsize::new(0),
        };
        (queue, receiver)
    }

    /// Called from the notify callback.
    pub(super) fn push(&self, event: RawEvent) {
        let mut spill = self.spill.lock();
        if !spill.is_empty() {
            self.spill_into(&mut spill, event);
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("monitor queue full; spilling events");
                self.spill_into(&mut spill, event);
            }
            // Dispatcher is gone; the monitor is stopping.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn spill_into(&self, spill: &mut VecDeque<RawEvent>, event: RawEvent) {
        if spill.len() < self.spill_limit {
            spill.push_back(event);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped since the last call.
    pub(super) fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Takes everything that overflowed the channel, oldest first.
    ///
    /// Only meaningful once the channel itself has been drained.
    pub(super) fn take_spilled(&self) -> VecDeque<RawEvent> {
        std::mem::take(&mut *self.spill.lock())
    }
}
