//! The single ordered stream the session pump consumes from: messages parsed
//! off the wire by [`crate::transport::Transport`] and synthetic requests
//! pushed by the session controller interleave here in submission order.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use x30_protocol::Message;

/// What [`MessageQueue::pop`] resolves to once the queue has been closed and
/// drained. The pump matches on this to exit its loop instead of treating it
/// as an I/O error.
#[derive(Debug)]
pub enum Popped {
    Message(Message),
    Closed,
}

/// Unbounded, thread-safe, single-consumer FIFO. `push` never blocks; `pop`
/// suspends the consumer until an item is pushed or the queue is closed.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: Mutex<VecDeque<Message>>,
    closed: AtomicBool,
    notify: Notify,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, message: Message) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.items.lock().unwrap().push_back(message);
        self.notify.notify_one();
    }

    /// Blocks until a message is available or the queue closes.
    pub async fn pop(&self) -> Popped {
        loop {
            if let Some(message) = self.items.lock().unwrap().pop_front() {
                return Popped::Message(message);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Popped::Closed;
            }
            // Register for a wakeup before re-checking, so a push or close
            // racing between our checks above and this await isn't missed.
            let notified = self.notify.notified();
            if !self.items.lock().unwrap().is_empty() || self.closed.load(Ordering::SeqCst) {
                continue;
            }
            notified.await;
        }
    }

    /// Drops all pending messages atomically. Used by the state machine's
    /// terminal-state entry.
    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }

    /// Marks the queue closed and wakes every waiter; further pushes are
    /// dropped. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl x30_protocol::NavQueue for MessageQueue {
    fn clear(&self) {
        MessageQueue::clear(self)
    }

    fn push_procedure_reset(&self) {
        self.push(Message::ProcedureReset)
    }
}
