//! Open reservations of one server, with an insertion-ordered expiry queue.
//!
//! Reservations are created in timestamp order, so the oldest one is always at
//! the front of the queue and an expiry check only looks at what it removes.
//! A queue entry whose reservation was already bought or aborted is stale and
//! skipped; entries are matched by sequence number, not by customer alone.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ticket_sale_api::CustomerId;

use crate::error::UserError;
use crate::ticket::Ticket;

#[derive(Debug)]
struct Reservation {
    ticket: Ticket,
    seq: u64,
}

#[derive(Debug)]
struct Deadline {
    customer: CustomerId,
    seq: u64,
    reserved_at: Instant,
}

#[derive(Debug)]
pub struct Reservations {
    open: HashMap<CustomerId, Reservation>,
    expiry: VecDeque<Deadline>,
    next_seq: u64,
    timeout: Duration,
}

impl Reservations {
    pub fn new(timeout: Duration) -> Self {
        Self {
            open: HashMap::new(),
            expiry: VecDeque::new(),
            next_seq: 0,
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn contains(&self, customer: CustomerId) -> bool {
        self.open.contains_key(&customer)
    }

    /// Record a reservation for `customer`, who must not hold one already.
    pub fn insert(&mut self, customer: CustomerId, ticket: Ticket, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        debug_assert!(!self.open.contains_key(&customer));
        self.open.insert(customer, Reservation { ticket, seq });
        self.expiry.push_back(Deadline {
            customer,
            seq,
            reserved_at: now,
        });
    }

    /// Remove the reservation of `customer` if it holds ticket `ticket_id`.
    pub fn take(&mut self, customer: CustomerId, ticket_id: u32) -> Result<Ticket, UserError> {
        match self.open.get(&customer) {
            None => Err(UserError::NoReservation),
            Some(reservation) if reservation.ticket.id() != ticket_id => Err(UserError::TicketMismatch),
            Some(_) => self
                .open
                .remove(&customer)
                .map(|reservation| reservation.ticket)
                .ok_or(UserError::NoReservation),
        }
    }

    /// Remove every reservation older than the timeout and return its ticket.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Ticket> {
        let mut expired = Vec::new();
        while let Some(front) = self.expiry.front() {
            if now.saturating_duration_since(front.reserved_at) <= self.timeout {
                break;
            }
            let Some(deadline) = self.expiry.pop_front() else {
                break;
            };
            let current = self
                .open
                .get(&deadline.customer)
                .is_some_and(|reservation| reservation.seq == deadline.seq);
            if current {
                if let Some(reservation) = self.open.remove(&deadline.customer) {
                    expired.push(reservation.ticket);
                }
            }
        }
        expired
    }

    /// Remove every reservation regardless of age.
    pub fn drain(&mut self) -> Vec<Ticket> {
        self.expiry.clear();
        self.open.drain().map(|(_, reservation)| reservation.ticket).collect()
    }

    pub fn ticket_ids(&self) -> Vec<u32> {
        self.open.values().map(|reservation| reservation.ticket.id()).collect()
    }
}
