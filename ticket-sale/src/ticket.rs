//! Tickets and their state machine.

use crate::error::TicketError;

/// State of a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TicketState {
    Available,
    Reserved,
    Sold,
}

/// A uniquely numbered ticket.
///
/// A `Ticket` is an ownership token: it is neither `Clone` nor `Copy`, so at
/// any instant exactly one pool, reservation or ledger holds it.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    id: u32,
    state: TicketState,
}

impl Ticket {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            state: TicketState::Available,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TicketState {
        self.state
    }

    /// AVAILABLE -> RESERVED
    pub fn reserve(&mut self) -> Result<(), TicketError> {
        self.transition(TicketState::Available, TicketState::Reserved, "reserve")
    }

    /// RESERVED -> AVAILABLE
    pub fn abort(&mut self) -> Result<(), TicketError> {
        self.transition(TicketState::Reserved, TicketState::Available, "abort")
    }

    /// RESERVED -> SOLD
    pub fn sell(&mut self) -> Result<(), TicketError> {
        self.transition(TicketState::Reserved, TicketState::Sold, "sell")
    }

    fn transition(
        &mut self,
        from: TicketState,
        to: TicketState,
        transition: &'static str,
    ) -> Result<(), TicketError> {
        if self.state != from {
            return Err(TicketError {
                ticket: self.id,
                state: self.state,
                transition,
            });
        }
        self.state = to;
        Ok(())
    }
}
