//! # Ticket Sale Rocket
//!
//! A concurrent ticket sale system. A fixed inventory of numbered tickets is
//! sold by a dynamically scaled pool of server actors behind a load balancer,
//! while an estimator keeps every server informed about the tickets available
//! elsewhere.
//!
//! ## Core Components
//!
//! - **Balancer**: concurrent entry point implementing [`RequestHandler`]
//! - **Coordinator**: the server pool bookkeeping and the scaling algorithm
//! - **Server**: a single-threaded actor owning a slice of the tickets
//! - **Estimator**: periodically redistributes an availability estimate
//! - **Database**: the unallocated tickets and the sold ledger
//! - **Mailbox**: the two-priority queue every actor receives from
//!
//! ## Design Principles
//!
//! - Actor state is owned by exactly one thread and never locked
//! - Shared state is limited to the database and the pool bookkeeping, each
//!   behind its own lock, always taken in the order coordinator -> database
//! - Tickets are move-only values, so a ticket has exactly one owner
//! - Every request is answered exactly once
//!
//! ## Example
//!
//! ```no_run
//! use ticket_sale::{launch, Config, CustomerId, LocalRequest, RequestHandler, RequestKind};
//!
//! let balancer = launch(&Config::default().with_tickets(100)).unwrap();
//! let customer = CustomerId::random();
//! let response = LocalRequest::call(&balancer, RequestKind::ReserveTicket, customer, None, None).unwrap();
//! println!("{response:?}");
//! balancer.shutdown();
//! ```

pub mod balancer;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod estimator;
pub mod logging;
pub mod mailbox;
pub mod server;
pub mod ticket;

use std::sync::Arc;

pub use ticket_sale_api::{
    Config, CustomerId, LocalRequest, RawRequest, Request, RequestHandler, RequestKind, RequestMethod, Response,
    ServerId,
};

pub use balancer::Balancer;
pub use config::RocketConfig;
pub use coordinator::{Coordinator, PoolSummary};
pub use database::Database;
pub use error::{SystemError, TicketError, UserError};
pub use mailbox::Mailbox;
pub use server::{ServerSnapshot, ServerStatus};
pub use ticket::{Ticket, TicketState};

use crate::estimator::Estimator;
use crate::server::ServerEnv;

/// Start the rocket with the launcher's configuration.
pub fn launch(config: &Config) -> Result<Balancer, SystemError> {
    launch_with(RocketConfig::from_config(config))
}

/// Start the rocket: the database, the initial servers and the estimator.
pub fn launch_with(config: RocketConfig) -> Result<Balancer, SystemError> {
    let database = Arc::new(Database::new(config.tickets));
    let estimator_mailbox = Mailbox::new();
    let (retired_tx, retired_rx) = flume::unbounded();

    let env = ServerEnv {
        database: Arc::clone(&database),
        estimator: estimator_mailbox.clone(),
        retired: retired_tx,
        reservation_timeout: config.reservation_timeout,
    };
    let coordinator = Arc::new(Coordinator::new(env, retired_rx, config.spare_records));

    if let Err(err) = coordinator.scale(config.initial_servers as usize) {
        let _ = coordinator.shutdown();
        return Err(err);
    }

    let estimator = Estimator::new(
        estimator_mailbox.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&database),
        config.clone(),
    );
    let estimator_handle = match estimator.spawn() {
        Ok(handle) => handle,
        Err(err) => {
            let _ = coordinator.shutdown();
            return Err(err);
        }
    };

    crate::log_system!(
        "launch",
        "completed",
        tickets = config.tickets,
        servers = coordinator.num_active()
    );
    Ok(Balancer::new(coordinator, database, estimator_mailbox, estimator_handle, config))
}
