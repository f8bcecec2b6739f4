//! # Load Balancer
//!
//! The single entry point of the rocket. Any number of transport threads call
//! [`Balancer::handle`] concurrently. Pool management requests are answered
//! right here; ticket requests are forwarded to a server as low-priority
//! messages.
//!
//! ## Routing
//! - A customer pinned to an active server stays there
//! - A customer pinned to a terminating server keeps it for buy, abort and
//!   availability requests, but is moved for a new reservation
//! - Everyone else goes to a uniformly chosen active server and gets pinned
//!   through the server id in the response
//!
//! A request refused by a closed mailbox comes back and is routed again.

use std::sync::Arc;
use std::thread::JoinHandle;

use ticket_sale_api::{Request, RequestHandler, RequestKind, ServerId};
use tracing::debug;

use crate::config::RocketConfig;
use crate::coordinator::{Coordinator, ServerRef};
use crate::database::Database;
use crate::error::{SystemError, UserError};
use crate::estimator::EstimatorMessage;
use crate::mailbox::Mailbox;
use crate::server::{ServerMessage, ServerSnapshot, ServerStatus};
use crate::{log_error, log_system};

/// Routing attempts before giving up on a request.
const MAX_ROUTE_ATTEMPTS: usize = 8;

pub struct Balancer {
    coordinator: Arc<Coordinator>,
    database: Arc<Database>,
    estimator: Mailbox<EstimatorMessage>,
    estimator_handle: Option<JoinHandle<()>>,
    config: RocketConfig,
}

impl Balancer {
    pub(crate) fn new(
        coordinator: Arc<Coordinator>,
        database: Arc<Database>,
        estimator: Mailbox<EstimatorMessage>,
        estimator_handle: JoinHandle<()>,
        config: RocketConfig,
    ) -> Self {
        Self {
            coordinator,
            database,
            estimator,
            estimator_handle: Some(estimator_handle),
            config,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn config(&self) -> &RocketConfig {
        &self.config
    }

    fn set_num_servers(&self, mut request: Request) {
        let Some(target) = request.read_u32() else {
            return request.respond_with_err(UserError::MissingServerCount.to_string());
        };
        match self.coordinator.scale(target as usize) {
            Ok(active) => request.respond_with_int(active as u32),
            Err(err) => {
                log_error!(err, target = target);
                request.respond_with_err(UserError::Internal.to_string());
            }
        }
    }

    /// The server a request should go to, if the customer's pin still holds.
    fn pinned_target(&self, request: &Request) -> Option<ServerRef> {
        let server = self.coordinator.server(request.server_id()?)?;
        let keep = match server.status {
            ServerStatus::Active => true,
            ServerStatus::Terminating => request.kind() != RequestKind::ReserveTicket,
            ServerStatus::Terminated => false,
        };
        keep.then_some(server)
    }

    fn route(&self, mut request: Request) {
        let mut target = self.pinned_target(&request);
        for _ in 0..MAX_ROUTE_ATTEMPTS {
            let Some(server) = target.take().or_else(|| self.coordinator.random_server()) else {
                break;
            };
            request.set_server_id(server.id);
            match server.mailbox.send_low_priority(ServerMessage::Process(request)) {
                Ok(()) => return,
                Err(err) => match err.into_inner() {
                    ServerMessage::Process(returned) => {
                        debug!(server = %server.id, "mailbox closed, rerouting");
                        request = returned;
                        self.coordinator.reap_retired();
                    }
                    _ => return,
                },
            }
        }
        request.respond_with_err(UserError::NoActiveServer.to_string());
    }

    /// One-line summary of the pool and the database.
    pub fn debug_summary(&self) -> String {
        let pool = self.coordinator.summary();
        format!(
            "active={} terminating={} terminated={} available={} sold={}",
            pool.active,
            pool.terminating,
            pool.terminated,
            self.database.num_available(),
            self.database.num_sold(),
        )
    }

    /// Snapshots of every server that still holds or may hold tickets.
    ///
    /// Servers that terminate while being asked are skipped.
    pub fn inspect(&self) -> Result<Vec<ServerSnapshot>, SystemError> {
        let mut pending = Vec::new();
        for server in self.coordinator.estimator_servers() {
            let (tx, rx) = flume::bounded(1);
            if server.mailbox.send_high_priority(ServerMessage::Inspect(tx)).is_ok() {
                pending.push((server.id, rx));
            }
        }
        pending
            .into_iter()
            .map(|(id, rx): (ServerId, flume::Receiver<ServerSnapshot>)| {
                rx.recv_timeout(self.config.inspect_timeout)
                    .map_err(|_| SystemError::Unresponsive(id))
            })
            .collect()
    }

    /// Stop the estimator and every server, and wait for their threads.
    pub fn shutdown_and_wait(mut self) -> Result<(), SystemError> {
        log_system!("shutdown", "started");
        let _ = self.estimator.send_high_priority(EstimatorMessage::Shutdown);
        let estimator = match self.estimator_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SystemError::ActorPanicked("estimator".to_string())),
            None => Ok(()),
        };
        if let Err(err) = &estimator {
            log_error!(err);
        }
        let servers = self.coordinator.shutdown();
        log_system!(
            "shutdown",
            "completed",
            available = self.database.num_available(),
            sold = self.database.num_sold()
        );
        estimator.and(servers)
    }
}

impl RequestHandler for Balancer {
    fn handle(&self, request: Request) {
        self.coordinator.reap_retired();
        match request.kind() {
            RequestKind::GetNumServers => request.respond_with_int(self.coordinator.num_active() as u32),
            RequestKind::SetNumServers => self.set_num_servers(request),
            RequestKind::GetServers => request.respond_with_server_list(&self.coordinator.active_servers()),
            RequestKind::Debug => request.respond_with_string(self.debug_summary()),
            RequestKind::NumAvailableTickets
            | RequestKind::ReserveTicket
            | RequestKind::BuyTicket
            | RequestKind::AbortPurchase => self.route(request),
        }
    }

    fn shutdown(self) {
        if let Err(err) = self.shutdown_and_wait() {
            log_error!(err);
        }
    }
}
