use std::fmt;

use thiserror::Error;
use ticket_sale_api::ServerId;

use crate::ticket::{Ticket, TicketState};

/// Errors reported back to the customer that sent a request.
///
/// The `Display` text is exactly what the customer receives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("No ticket id provided!")]
    MissingTicketId,
    #[error("No number of servers provided!")]
    MissingServerCount,
    #[error("A ticket has already been reserved!")]
    AlreadyReserved,
    #[error("No ticket has been reserved!")]
    NoReservation,
    #[error("Invalid ticket id provided!")]
    TicketMismatch,
    #[error("Server is shutting down, please retry!")]
    ServerTerminating,
    #[error("No server is available!")]
    NoActiveServer,
    #[error("Request kind {0} is not served here!")]
    Unsupported(String),
    #[error("Internal error, the operation was aborted!")]
    Internal,
}

/// Illegal ticket state transition. Always a coordination bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal transition '{transition}' for ticket {ticket} in state {state:?}")]
pub struct TicketError {
    pub ticket: u32,
    pub state: TicketState,
    pub transition: &'static str,
}

/// A ticket handed to the sold ledger without having been sold. The ticket
/// is handed back so it is not lost.
#[derive(Error, Debug)]
#[error("Ticket {} cannot be retired: {source}", .ticket.id())]
pub struct RetireError {
    pub ticket: Ticket,
    #[source]
    pub source: TicketError,
}

/// A send into a closed mailbox. Hands the undelivered message back.
#[derive(Error)]
#[error("Mailbox is closed")]
pub struct SendError<M>(pub M);

impl<M> SendError<M> {
    pub fn into_inner(self) -> M {
        self.0
    }
}

impl<M> fmt::Debug for SendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

/// Errors related to the system itself.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Actor thread '{0}' panicked")]
    ActorPanicked(String),
    #[error("Server pool bookkeeping is inconsistent: {0}")]
    Bookkeeping(String),
    #[error("Server {0} did not answer in time")]
    Unresponsive(ServerId),
}
