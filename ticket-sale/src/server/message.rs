use std::fmt;

use ticket_sale_api::{Request, ServerId};

/// Lifecycle of a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServerStatus {
    Active = 0,
    Terminating = 1,
    Terminated = 2,
}

impl ServerStatus {
    #[inline]
    pub fn is_active(self) -> bool {
        self == ServerStatus::Active
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::Active => "active",
            ServerStatus::Terminating => "terminating",
            ServerStatus::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Messages a server actor understands.
#[derive(Debug)]
pub enum ServerMessage {
    /// A customer request routed here by the balancer.
    Process(Request),
    /// Stop taking new reservations and drain.
    Shutdown,
    /// Estimated number of tickets available outside this server.
    TicketsAvailable(u32),
    /// Report a snapshot of the private state on the given channel.
    Inspect(flume::Sender<ServerSnapshot>),
    /// Give every ticket back and exit. Only sent on system shutdown.
    Halt,
}

impl ServerMessage {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ServerMessage::Process(_) => "Process",
            ServerMessage::Shutdown => "Shutdown",
            ServerMessage::TicketsAvailable(_) => "TicketsAvailable",
            ServerMessage::Inspect(_) => "Inspect",
            ServerMessage::Halt => "Halt",
        }
    }
}

/// Private state of a server at one instant, as reported to `Inspect`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub id: ServerId,
    pub status: ServerStatus,
    /// Ids of the tickets in the allocated pool.
    pub allocated: Vec<u32>,
    /// Ids of the tickets held by open reservations.
    pub reserved: Vec<u32>,
    /// Latest estimate received from the estimator.
    pub estimate: u32,
}

impl ServerSnapshot {
    /// Number of tickets this server owns.
    pub fn held(&self) -> usize {
        self.allocated.len() + self.reserved.len()
    }
}
