//! # Database
//!
//! The pool of unallocated tickets and the ledger of sold ones. Every access
//! goes through one mutex; allocation and deallocation move whole batches, so
//! the lock is held briefly and rarely compared to per-ticket work, which
//! happens on the servers.

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{RetireError, TicketError};
use crate::ticket::{Ticket, TicketState};

#[derive(Debug, Default)]
struct Inner {
    /// Unallocated tickets; allocation takes from the tail.
    pool: Vec<Ticket>,
    /// Sold tickets.
    sold: Vec<Ticket>,
}

/// Point-in-time copy of the ticket ids the database holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSnapshot {
    pub available: Vec<u32>,
    pub sold: Vec<u32>,
}

#[derive(Debug)]
pub struct Database {
    inner: Mutex<Inner>,
    total: u32,
}

impl Database {
    /// Create a database holding the tickets `0..tickets`.
    pub fn new(tickets: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pool: (0..tickets).map(Ticket::new).collect(),
                sold: Vec::new(),
            }),
            total: tickets,
        }
    }

    /// Number of tickets the database was created with.
    #[inline]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of unallocated tickets.
    pub fn num_available(&self) -> u32 {
        self.inner.lock().pool.len() as u32
    }

    /// Number of tickets in the sold ledger.
    pub fn num_sold(&self) -> u32 {
        self.inner.lock().sold.len() as u32
    }

    /// Take up to `n` tickets out of the pool. Returns fewer, possibly none,
    /// when the pool runs low.
    pub fn allocate(&self, n: usize) -> Vec<Ticket> {
        let mut inner = self.inner.lock();
        let split = inner.pool.len().saturating_sub(n);
        let tickets = inner.pool.split_off(split);
        trace!(requested = n, allocated = tickets.len(), remaining = inner.pool.len(), "allocate");
        tickets
    }

    /// Take `ceil(sqrt(available))` tickets out of the pool. Computed and
    /// taken under one lock, so concurrent callers never over-allocate.
    pub fn allocate_share(&self) -> Vec<Ticket> {
        let mut inner = self.inner.lock();
        let share = fair_share(inner.pool.len());
        let split = inner.pool.len() - share;
        let tickets = inner.pool.split_off(split);
        trace!(allocated = tickets.len(), remaining = inner.pool.len(), "allocate share");
        tickets
    }

    /// Give tickets back to the pool.
    pub fn deallocate(&self, tickets: Vec<Ticket>) {
        if tickets.is_empty() {
            return;
        }
        debug_assert!(tickets.iter().all(|t| t.state() == TicketState::Available));
        let mut inner = self.inner.lock();
        trace!(returned = tickets.len(), available = inner.pool.len() + tickets.len(), "deallocate");
        inner.pool.extend(tickets);
    }

    /// Move a sold ticket into the sold ledger.
    pub fn retire(&self, ticket: Ticket) -> Result<(), RetireError> {
        if ticket.state() != TicketState::Sold {
            let source = TicketError {
                ticket: ticket.id(),
                state: ticket.state(),
                transition: "retire",
            };
            return Err(RetireError { ticket, source });
        }
        self.inner.lock().sold.push(ticket);
        Ok(())
    }

    pub fn snapshot(&self) -> DatabaseSnapshot {
        let inner = self.inner.lock();
        DatabaseSnapshot {
            available: inner.pool.iter().map(Ticket::id).collect(),
            sold: inner.sold.iter().map(Ticket::id).collect(),
        }
    }
}

/// `ceil(sqrt(available))`, the batch a server takes from the pool.
pub fn fair_share(available: usize) -> usize {
    if available == 0 {
        return 0;
    }
    ((available as f64).sqrt().ceil() as usize).clamp(1, available)
}
