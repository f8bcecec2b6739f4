//! # Two-priority Mailbox
//!
//! Every actor in the rocket owns one [`Mailbox`]. Any number of threads may
//! send into it; the owning actor receives from it.
//!
//! ## Key Concepts
//! - Two unbounded FIFO queues, one per priority class
//! - A token queue carries one token per message, so a receiver can block on
//!   "any message arrived" without polling both queues
//! - A receiver that got a token always drains the high-priority queue first
//!
//! ## Ordering
//! All high-priority messages queued at the time of a receive are delivered
//! before any low-priority message. Within one class delivery is FIFO.
//!
//! ## Closing
//! A closed mailbox refuses new messages and hands them back inside
//! [`SendError`]. Messages queued before the close can still be received,
//! which lets a terminating actor answer everything that reached it.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use flume::{Receiver, Sender};
use parking_lot::RwLock;

use crate::error::SendError;

struct Queue<M> {
    tx: Sender<M>,
    rx: Receiver<M>,
}

impl<M> Queue<M> {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

struct Inner<M> {
    high: Queue<M>,
    low: Queue<M>,
    tokens: Queue<()>,
    /// Held for reading by every send, so `close` waits for in-flight sends
    /// and no message can slip in after it returns.
    closed: RwLock<bool>,
}

/// A thread-safe two-priority message queue.
///
/// Cloning a mailbox yields another handle to the same queues.
pub struct Mailbox<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("high", &self.inner.high.rx.len())
            .field("low", &self.inner.low.rx.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Mailbox<M> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                high: Queue::new(),
                low: Queue::new(),
                tokens: Queue::new(),
                closed: RwLock::new(false),
            }),
        }
    }

    /// Queue a message ahead of every low-priority message.
    pub fn send_high_priority(&self, msg: M) -> Result<(), SendError<M>> {
        self.send(&self.inner.high, msg)
    }

    /// Queue a message behind every high-priority message.
    pub fn send_low_priority(&self, msg: M) -> Result<(), SendError<M>> {
        self.send(&self.inner.low, msg)
    }

    fn send(&self, queue: &Queue<M>, msg: M) -> Result<(), SendError<M>> {
        let closed = self.inner.closed.read();
        if *closed {
            return Err(SendError(msg));
        }
        // Both channel ends live in `inner`, so an unbounded send cannot fail.
        queue.tx.send(msg).map_err(|flume::SendError(msg)| SendError(msg))?;
        let _ = self.inner.tokens.tx.send(());
        Ok(())
    }

    /// Block until a message is available and return it.
    pub fn recv(&self) -> M {
        let _ = self.inner.tokens.rx.recv();
        self.take()
    }

    /// Return a message if one is queued, without blocking.
    pub fn try_recv(&self) -> Option<M> {
        self.inner.tokens.rx.try_recv().ok()?;
        Some(self.take())
    }

    /// Block until a message is available or `deadline` passes.
    pub fn recv_deadline(&self, deadline: Instant) -> Option<M> {
        self.inner.tokens.rx.recv_deadline(deadline).ok()?;
        Some(self.take())
    }

    /// Drain every message queued right now, in delivery order.
    pub fn try_iter(&self) -> impl Iterator<Item = M> + '_ {
        std::iter::from_fn(move || self.try_recv())
    }

    // A token is only sent after its message was queued, so a holder of a
    // token always finds a message in one of the queues. The loop covers a
    // concurrent receiver taking the low message while a new high one lands.
    fn take(&self) -> M {
        loop {
            if let Ok(msg) = self.inner.high.rx.try_recv() {
                return msg;
            }
            if let Ok(msg) = self.inner.low.rx.try_recv() {
                return msg;
            }
            std::hint::spin_loop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tokens.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.tokens.rx.len()
    }

    /// Stop accepting messages. Returns `false` if the mailbox was already closed.
    pub fn close(&self) -> bool {
        let mut closed = self.inner.closed.write();
        !std::mem::replace(&mut *closed, true)
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_high_priority_first() {
        let mailbox = Mailbox::new();
        mailbox.send_high_priority("H1").unwrap();
        mailbox.send_low_priority("L1").unwrap();
        mailbox.send_high_priority("H2").unwrap();
        mailbox.send_low_priority("L2").unwrap();

        let received: Vec<_> = (0..4).map(|_| mailbox.recv()).collect();
        assert_eq!(received, vec!["H1", "H2", "L1", "L2"]);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_fifo_within_class() {
        let mailbox = Mailbox::new();
        for i in 0..100 {
            mailbox.send_low_priority(i).unwrap();
        }
        let received: Vec<_> = mailbox.try_iter().collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_try_recv_on_empty() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.try_recv(), None);
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.len(), 0);
    }

    #[test]
    fn test_recv_blocks_until_send() {
        let mailbox = Mailbox::new();
        let sender = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.send_low_priority(42u32).unwrap();
        });
        assert_eq!(mailbox.recv(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_recv_deadline_times_out() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        let start = Instant::now();
        assert_eq!(mailbox.recv_deadline(start + Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));

        mailbox.send_high_priority(1).unwrap();
        assert_eq!(mailbox.recv_deadline(Instant::now() + Duration::from_secs(1)), Some(1));
    }

    #[test]
    fn test_closed_mailbox_returns_message() {
        let mailbox = Mailbox::new();
        mailbox.send_low_priority(1).unwrap();
        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());

        let err = mailbox.send_high_priority(2).unwrap_err();
        assert_eq!(err.into_inner(), 2);
        // Messages queued before the close are still delivered.
        assert_eq!(mailbox.try_recv(), Some(1));
        assert_eq!(mailbox.try_recv(), None);
    }

    #[test]
    fn test_concurrent_senders() {
        let mailbox = Mailbox::new();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mailbox = mailbox.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        mailbox.send_low_priority(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut received: Vec<u32> = mailbox.try_iter().collect();
        assert_eq!(received.len(), 1000);
        // Per-sender order is preserved.
        for t in 0..4 {
            let own: Vec<_> = received.iter().filter(|v| **v / 1000 == t).copied().collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
        received.sort_unstable();
        received.dedup();
        assert_eq!(received.len(), 1000);
    }
}
