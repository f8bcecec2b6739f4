//! # Estimator Actor
//!
//! Periodically tells every server how many tickets are available outside of
//! it, so availability answers approximate the whole system instead of one
//! server's slice.
//!
//! One sweep probes every active and terminating server once, spaced so the
//! sweep takes about one roundtrip. Between probes the estimator collects the
//! servers' replies. The estimate a server receives is the database's count
//! plus the last reported pool size of every other server, so it is at most
//! one roundtrip stale.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ticket_sale_api::ServerId;
use tracing::{debug, trace};

use crate::config::RocketConfig;
use crate::coordinator::Coordinator;
use crate::database::Database;
use crate::error::SystemError;
use crate::mailbox::Mailbox;
use crate::server::ServerMessage;
use crate::{actor_span, log_lifecycle};

/// Lower bound between two probes, for a roundtrip configured as zero.
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1);

/// Messages the estimator understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimatorMessage {
    /// A server's reply to `TicketsAvailable`: its locally held tickets.
    AvailableServer { server: ServerId, available: u32 },
    /// Stop the estimator.
    Shutdown,
}

pub struct Estimator {
    mailbox: Mailbox<EstimatorMessage>,
    coordinator: Arc<Coordinator>,
    database: Arc<Database>,
    config: RocketConfig,
    reports: HashMap<ServerId, u32>,
}

impl Estimator {
    pub fn new(
        mailbox: Mailbox<EstimatorMessage>,
        coordinator: Arc<Coordinator>,
        database: Arc<Database>,
        config: RocketConfig,
    ) -> Self {
        Self {
            mailbox,
            coordinator,
            database,
            config,
            reports: HashMap::new(),
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>, SystemError> {
        let name = "estimator".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|source| SystemError::ThreadSpawn { name, source })
    }

    fn run(mut self) {
        let span = actor_span!("estimator", "main");
        let _enter = span.enter();
        log_lifecycle!("estimator", "main", "started");

        while self.sweep().is_continue() {}

        self.mailbox.close();
        log_lifecycle!("estimator", "main", "stopped");
    }

    /// Probe every known server once. Breaks on `Shutdown`.
    fn sweep(&mut self) -> ControlFlow<()> {
        let servers = self.coordinator.estimator_servers();
        let known: HashSet<ServerId> = servers.iter().map(|server| server.id).collect();
        self.reports.retain(|id, _| known.contains(id));

        if servers.is_empty() {
            trace!("no servers to probe");
            return self.wait(Instant::now() + self.config.estimator_fallback);
        }

        let interval = self.config.probe_interval(servers.len()).max(MIN_PROBE_INTERVAL);
        for server in servers {
            let estimate = self.estimate_for(server.id);
            if server
                .mailbox
                .send_high_priority(ServerMessage::TicketsAvailable(estimate))
                .is_err()
            {
                debug!(server = %server.id, "server mailbox closed, forgetting its report");
                self.reports.remove(&server.id);
            }
            self.wait(Instant::now() + interval)?;
        }
        ControlFlow::Continue(())
    }

    /// Collect replies until `deadline`.
    fn wait(&mut self, deadline: Instant) -> ControlFlow<()> {
        while let Some(msg) = self.mailbox.recv_deadline(deadline) {
            match msg {
                EstimatorMessage::AvailableServer { server, available } => {
                    self.reports.insert(server, available);
                }
                EstimatorMessage::Shutdown => return ControlFlow::Break(()),
            }
        }
        ControlFlow::Continue(())
    }

    /// Tickets available outside of `server`.
    fn estimate_for(&self, server: ServerId) -> u32 {
        let others: u32 = self
            .reports
            .iter()
            .filter(|(id, _)| **id != server)
            .map(|(_, available)| *available)
            .sum();
        self.database.num_available() + others
    }
}
