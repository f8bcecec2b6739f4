//! # Server Actor
//!
//! A server owns a private slice of the tickets and sells them to the
//! customers the balancer routes to it. It runs on its own named thread and
//! touches its state only from that thread, so none of it is locked.
//!
//! ## Key Concepts
//! - Lifecycle: `Active` -> `Terminating` on `Shutdown`, then `Terminated`
//!   once no ticket and no reservation is left
//! - Reservations expire after the configured timeout; expiry is checked
//!   before each message is handled
//! - An active server with an empty pool refills it from the database before
//!   declaring the tickets sold out
//!
//! ## Termination
//! A terminated server closes its mailbox, answers everything still queued,
//! and announces its id on the retirement channel so the coordinator can
//! reap the record and join the thread.

mod message;
mod reservation;

pub use message::{ServerMessage, ServerSnapshot, ServerStatus};
pub use reservation::Reservations;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ticket_sale_api::{Request, RequestKind, ServerId};
use tracing::debug;

use crate::database::Database;
use crate::error::{SystemError, UserError};
use crate::estimator::EstimatorMessage;
use crate::mailbox::Mailbox;
use crate::ticket::{Ticket, TicketState};
use crate::{actor_span, log_error, log_lifecycle, log_message};

/// What a server shares with the rest of the rocket.
#[derive(Clone, Debug)]
pub struct ServerEnv {
    pub database: Arc<Database>,
    /// Where replies to `TicketsAvailable` go.
    pub estimator: Mailbox<EstimatorMessage>,
    /// Receives the id of every server that reached `Terminated`.
    pub retired: flume::Sender<ServerId>,
    pub reservation_timeout: Duration,
}

pub struct Server {
    id: ServerId,
    status: ServerStatus,
    mailbox: Mailbox<ServerMessage>,
    pool: Vec<Ticket>,
    reservations: Reservations,
    /// Tickets available outside this server, as last reported by the estimator.
    estimate: u32,
    env: ServerEnv,
}

impl Server {
    /// A server starting with an empty pool.
    pub fn new(id: ServerId, mailbox: Mailbox<ServerMessage>, env: ServerEnv) -> Self {
        Self {
            id,
            status: ServerStatus::Active,
            mailbox,
            pool: Vec::new(),
            reservations: Reservations::new(env.reservation_timeout),
            estimate: 0,
            env,
        }
    }

    /// A server whose pool is seeded with its share of the database.
    pub fn seeded(id: ServerId, mailbox: Mailbox<ServerMessage>, env: ServerEnv) -> Self {
        let mut server = Self::new(id, mailbox, env);
        server.pool = server.env.database.allocate_share();
        server
    }

    #[inline]
    pub fn id(&self) -> ServerId {
        self.id
    }

    #[inline]
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Run the server on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<()>, SystemError> {
        let name = thread_name(self.id);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|source| SystemError::ThreadSpawn { name, source })
    }

    fn run(mut self) {
        let span = actor_span!("server", self.id);
        let _enter = span.enter();
        log_lifecycle!("server", self.id, "started", tickets = self.pool.len());

        while self.status != ServerStatus::Terminated {
            let msg = self.mailbox.recv();
            self.expire_reservations(Instant::now());
            self.handle(msg);
            self.check_drained();
        }
        self.finish();
    }

    /// Handle one message. The caller runs the expiry check first.
    pub(crate) fn handle(&mut self, msg: ServerMessage) {
        log_message!(msg.name(), "received", status = %self.status);
        match msg {
            ServerMessage::Process(request) => self.process(request),
            ServerMessage::Shutdown => self.shutdown(),
            ServerMessage::TicketsAvailable(estimate) => {
                self.estimate = estimate;
                let reply = EstimatorMessage::AvailableServer {
                    server: self.id,
                    available: self.pool.len() as u32,
                };
                if self.env.estimator.send_high_priority(reply).is_err() {
                    debug!("estimator mailbox closed, dropping availability report");
                }
            }
            ServerMessage::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ServerMessage::Halt => self.halt(),
        }
    }

    fn process(&mut self, mut request: Request) {
        request.set_server_id(self.id);
        match request.kind() {
            RequestKind::NumAvailableTickets => {
                let available = self.pool.len() as u32 + self.estimate;
                request.respond_with_int(available);
            }
            RequestKind::ReserveTicket => self.reserve(request),
            RequestKind::BuyTicket => self.buy(request),
            RequestKind::AbortPurchase => self.abort(request),
            kind => request.respond_with_err(UserError::Unsupported(format!("{kind:?}")).to_string()),
        }
    }

    fn reserve(&mut self, request: Request) {
        let customer = request.customer_id();
        if self.reservations.contains(customer) {
            return request.respond_with_err(UserError::AlreadyReserved.to_string());
        }
        if !self.status.is_active() {
            return request.respond_with_err(UserError::ServerTerminating.to_string());
        }
        if self.pool.is_empty() {
            self.pool = self.env.database.allocate_share();
            debug!(allocated = self.pool.len(), "refilled pool");
        }
        let Some(mut ticket) = self.pool.pop() else {
            log_message!("ReserveTicket", "sold out");
            return request.respond_with_sold_out();
        };
        if let Err(err) = ticket.reserve() {
            log_error!(err, server = %self.id, customer = %customer);
            self.restore(ticket);
            return request.respond_with_err(UserError::Internal.to_string());
        }
        let id = ticket.id();
        self.reservations.insert(customer, ticket, Instant::now());
        log_message!("ReserveTicket", "reserved", ticket = id);
        request.respond_with_int(id);
    }

    fn buy(&mut self, mut request: Request) {
        let Some(ticket_id) = request.read_u32() else {
            return request.respond_with_err(UserError::MissingTicketId.to_string());
        };
        let customer = request.customer_id();
        let mut ticket = match self.reservations.take(customer, ticket_id) {
            Ok(ticket) => ticket,
            Err(err) => return request.respond_with_err(err.to_string()),
        };
        if let Err(err) = ticket.sell() {
            log_error!(err, server = %self.id, customer = %customer);
            self.restore(ticket);
            return request.respond_with_err(UserError::Internal.to_string());
        }
        if let Err(err) = self.env.database.retire(ticket) {
            log_error!(err, server = %self.id, customer = %customer);
            self.restore(err.ticket);
            return request.respond_with_err(UserError::Internal.to_string());
        }
        log_message!("BuyTicket", "sold", ticket = ticket_id);
        request.respond_with_int(ticket_id);
    }

    fn abort(&mut self, mut request: Request) {
        let Some(ticket_id) = request.read_u32() else {
            return request.respond_with_err(UserError::MissingTicketId.to_string());
        };
        let customer = request.customer_id();
        let mut ticket = match self.reservations.take(customer, ticket_id) {
            Ok(ticket) => ticket,
            Err(err) => return request.respond_with_err(err.to_string()),
        };
        if let Err(err) = ticket.abort() {
            log_error!(err, server = %self.id, customer = %customer);
            self.restore(ticket);
            return request.respond_with_err(UserError::Internal.to_string());
        }
        self.give_back(ticket);
        log_message!("AbortPurchase", "aborted", ticket = ticket_id);
        request.respond_with_int(ticket_id);
    }

    fn shutdown(&mut self) {
        if !self.status.is_active() {
            debug!(status = %self.status, "ignoring repeated shutdown");
            return;
        }
        self.status = ServerStatus::Terminating;
        let returned = self.pool.len();
        self.env.database.deallocate(std::mem::take(&mut self.pool));
        log_lifecycle!(
            "server",
            self.id,
            "terminating",
            returned = returned,
            reservations = self.reservations.len()
        );
    }

    fn halt(&mut self) {
        self.status = ServerStatus::Terminated;
        self.return_everything();
        log_lifecycle!("server", self.id, "halted");
    }

    /// Release every reservation older than the timeout.
    pub(crate) fn expire_reservations(&mut self, now: Instant) {
        for mut ticket in self.reservations.take_expired(now) {
            debug!(ticket = ticket.id(), "reservation expired");
            match ticket.abort() {
                Ok(()) => self.give_back(ticket),
                Err(err) => {
                    log_error!(err, server = %self.id);
                    self.restore(ticket);
                }
            }
        }
    }

    fn check_drained(&mut self) {
        if self.status == ServerStatus::Terminating && self.pool.is_empty() && self.reservations.is_empty() {
            self.status = ServerStatus::Terminated;
        }
    }

    fn finish(&mut self) {
        self.mailbox.close();
        let mut answered = 0usize;
        for msg in self.mailbox.try_iter() {
            match msg {
                ServerMessage::Process(request) => {
                    request.respond_with_err(UserError::ServerTerminating.to_string());
                    answered += 1;
                }
                ServerMessage::Inspect(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                ServerMessage::Shutdown | ServerMessage::TicketsAvailable(_) | ServerMessage::Halt => {}
            }
        }
        if self.env.retired.send(self.id).is_err() {
            debug!("retirement channel closed");
        }
        log_lifecycle!("server", self.id, "terminated", answered = answered);
    }

    /// An available ticket goes back to the pool while active and to the
    /// database otherwise.
    fn give_back(&mut self, ticket: Ticket) {
        if self.status.is_active() {
            self.pool.push(ticket);
        } else {
            self.env.database.deallocate(vec![ticket]);
        }
    }

    /// Put a ticket whose transition failed back where its state belongs, so
    /// a fault never loses it.
    fn restore(&mut self, mut ticket: Ticket) {
        match ticket.state() {
            TicketState::Available => self.give_back(ticket),
            TicketState::Reserved => {
                if ticket.abort().is_ok() {
                    self.give_back(ticket);
                }
            }
            TicketState::Sold => {
                if let Err(err) = self.env.database.retire(ticket) {
                    log_error!(err, server = %self.id);
                }
            }
        }
    }

    fn return_everything(&mut self) {
        let mut tickets = std::mem::take(&mut self.pool);
        for mut ticket in self.reservations.drain() {
            if ticket.abort().is_ok() {
                tickets.push(ticket);
            }
        }
        self.env.database.deallocate(tickets);
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id,
            status: self.status,
            allocated: self.pool.iter().map(Ticket::id).collect(),
            reserved: self.reservations.ticket_ids(),
            estimate: self.estimate,
        }
    }
}

impl Drop for Server {
    // Covers a thread that failed to spawn or panicked mid-message.
    fn drop(&mut self) {
        if !self.pool.is_empty() || !self.reservations.is_empty() {
            self.return_everything();
        }
    }
}

fn thread_name(id: ServerId) -> String {
    let uuid = id.to_string();
    format!("server-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_sale_api::{CustomerId, LocalRequest, Response};

    struct Fixture {
        env: ServerEnv,
        estimator: Mailbox<EstimatorMessage>,
        retired: flume::Receiver<ServerId>,
    }

    fn fixture(tickets: u32, timeout: Duration) -> Fixture {
        let estimator = Mailbox::new();
        let (retired_tx, retired) = flume::unbounded();
        let env = ServerEnv {
            database: Arc::new(Database::new(tickets)),
            estimator: estimator.clone(),
            retired: retired_tx,
            reservation_timeout: timeout,
        };
        Fixture { env, estimator, retired }
    }

    fn call(server: &mut Server, kind: RequestKind, customer: CustomerId, payload: Option<u32>) -> Response {
        let (request, mut rx) = LocalRequest::new(kind, customer, None, payload);
        server.handle(ServerMessage::Process(request));
        rx.try_recv().unwrap()
    }

    #[test]
    fn test_reserve_buy_and_rebuy() {
        let fx = fixture(10, Duration::from_secs(10));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        let customer = CustomerId::random();

        let response = call(&mut server, RequestKind::ReserveTicket, customer, None);
        assert_eq!(response.int(), Some(9));
        assert_eq!(response.server(), Some(server.id()));

        let response = call(&mut server, RequestKind::BuyTicket, customer, Some(9));
        assert_eq!(response.int(), Some(9));
        assert_eq!(fx.env.database.num_sold(), 1);

        let response = call(&mut server, RequestKind::BuyTicket, customer, Some(9));
        assert_eq!(response.error(), Some("No ticket has been reserved!"));
    }

    #[test]
    fn test_duplicate_reservation_and_mismatch() {
        let fx = fixture(10, Duration::from_secs(10));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        let customer = CustomerId::random();

        let ticket = call(&mut server, RequestKind::ReserveTicket, customer, None).int().unwrap();
        let response = call(&mut server, RequestKind::ReserveTicket, customer, None);
        assert_eq!(response.error(), Some("A ticket has already been reserved!"));

        let response = call(&mut server, RequestKind::AbortPurchase, customer, Some(ticket + 100));
        assert_eq!(response.error(), Some("Invalid ticket id provided!"));

        let response = call(&mut server, RequestKind::AbortPurchase, customer, None);
        assert_eq!(response.error(), Some("No ticket id provided!"));

        let response = call(&mut server, RequestKind::AbortPurchase, customer, Some(ticket));
        assert_eq!(response.int(), Some(ticket));
        assert!(server.snapshot().allocated.contains(&ticket));
    }

    #[test]
    fn test_refill_then_sold_out() {
        let fx = fixture(2, Duration::from_secs(10));
        let mut server = Server::new(ServerId::random(), Mailbox::new(), fx.env.clone());
        assert!(server.snapshot().allocated.is_empty());

        for _ in 0..2 {
            let response = call(&mut server, RequestKind::ReserveTicket, CustomerId::random(), None);
            assert!(response.int().is_some());
        }
        let response = call(&mut server, RequestKind::ReserveTicket, CustomerId::random(), None);
        assert!(response.is_sold_out());
    }

    #[test]
    fn test_available_combines_pool_and_estimate() {
        let fx = fixture(10, Duration::from_secs(10));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        server.handle(ServerMessage::TicketsAvailable(6));

        match fx.estimator.try_recv() {
            Some(EstimatorMessage::AvailableServer { server: id, available }) => {
                assert_eq!(id, server.id());
                assert_eq!(available, 4);
            }
            other => panic!("unexpected estimator message: {other:?}"),
        }

        let response = call(&mut server, RequestKind::NumAvailableTickets, CustomerId::random(), None);
        assert_eq!(response.int(), Some(10));
    }

    #[test]
    fn test_expired_reservation_returns_to_pool() {
        let fx = fixture(10, Duration::from_millis(5));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        let customer = CustomerId::random();

        let ticket = call(&mut server, RequestKind::ReserveTicket, customer, None).int().unwrap();
        server.expire_reservations(Instant::now() + Duration::from_secs(1));

        let snapshot = server.snapshot();
        assert!(snapshot.reserved.is_empty());
        assert!(snapshot.allocated.contains(&ticket));

        let response = call(&mut server, RequestKind::BuyTicket, customer, Some(ticket));
        assert_eq!(response.error(), Some("No ticket has been reserved!"));
    }

    #[test]
    fn test_terminating_server_drains() {
        let fx = fixture(10, Duration::from_secs(10));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        let customer = CustomerId::random();
        let ticket = call(&mut server, RequestKind::ReserveTicket, customer, None).int().unwrap();

        server.handle(ServerMessage::Shutdown);
        server.check_drained();
        assert_eq!(server.status(), ServerStatus::Terminating);
        assert_eq!(fx.env.database.num_available(), 9);

        let response = call(&mut server, RequestKind::ReserveTicket, CustomerId::random(), None);
        assert_eq!(response.error(), Some("Server is shutting down, please retry!"));

        // A customer holding a reservation is told so before the shutdown.
        let response = call(&mut server, RequestKind::ReserveTicket, customer, None);
        assert_eq!(response.error(), Some("A ticket has already been reserved!"));

        let response = call(&mut server, RequestKind::AbortPurchase, customer, Some(ticket));
        assert_eq!(response.int(), Some(ticket));
        assert_eq!(fx.env.database.num_available(), 10);

        server.check_drained();
        assert_eq!(server.status(), ServerStatus::Terminated);
    }

    #[test]
    fn test_expiry_while_terminating_goes_to_database() {
        let fx = fixture(10, Duration::from_millis(5));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        call(&mut server, RequestKind::ReserveTicket, CustomerId::random(), None);
        server.handle(ServerMessage::Shutdown);

        server.expire_reservations(Instant::now() + Duration::from_secs(1));
        server.check_drained();
        assert_eq!(server.status(), ServerStatus::Terminated);
        assert_eq!(fx.env.database.num_available(), 10);
    }

    #[test]
    fn test_thread_answers_queued_requests_after_termination() {
        crate::logging::init_test();
        let fx = fixture(10, Duration::from_secs(10));
        let mailbox = Mailbox::new();
        let server = Server::seeded(ServerId::random(), mailbox.clone(), fx.env.clone());
        let id = server.id();

        // Queued before the thread starts: Shutdown is handled first and
        // terminates the idle server, the reservation is answered afterwards.
        mailbox.send_high_priority(ServerMessage::Shutdown).unwrap();
        let (request, rx) = LocalRequest::new(RequestKind::ReserveTicket, CustomerId::random(), None, None);
        mailbox.send_low_priority(ServerMessage::Process(request)).unwrap();

        let handle = server.spawn().unwrap();
        handle.join().unwrap();

        assert_eq!(fx.retired.recv().unwrap(), id);
        assert!(mailbox.is_closed());
        let response = rx.blocking_recv().unwrap();
        assert_eq!(response.error(), Some("Server is shutting down, please retry!"));
        assert_eq!(fx.env.database.num_available(), 10);
    }

    #[test]
    fn test_halt_returns_reserved_tickets() {
        let fx = fixture(10, Duration::from_secs(10));
        let mut server = Server::seeded(ServerId::random(), Mailbox::new(), fx.env.clone());
        call(&mut server, RequestKind::ReserveTicket, CustomerId::random(), None);
        server.handle(ServerMessage::Halt);
        assert_eq!(server.status(), ServerStatus::Terminated);
        assert_eq!(fx.env.database.num_available(), 10);
    }
}
