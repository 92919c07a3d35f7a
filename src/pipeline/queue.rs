//! Bounded producer/worker handoff queue.
//!
//! Producers never block: a full queue drops the event (the caller counts
//! it), a closed queue discards silently. Workers block on the empty
//! condition and drain every already-enqueued event after close.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::event::Event;
use crate::PipelineError;

pub struct EventQueue {
    sender: Mutex<Option<Sender<Event>>>,
    receiver: Receiver<Event>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            capacity,
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, event: Event) -> Result<(), PipelineError> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(event).map_err(|err| match err {
                TrySendError::Full(_) => PipelineError::QueueFull,
                TrySendError::Disconnected(_) => PipelineError::QueueClosed,
            }),
            None => Err(PipelineError::QueueClosed),
        }
    }

    /// Block until an event arrives; `None` once the queue is closed and
    /// fully drained.
    pub fn pop(&self) -> Option<Event> {
        self.receiver.recv().ok()
    }

    /// Close the queue. Enqueued events remain poppable; further pushes
    /// fail with [`PipelineError::QueueClosed`].
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
