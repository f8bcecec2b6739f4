/// Configuration of the ticket sale system, as supplied by the launcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of tickets initially for sale.
    pub tickets: u32,

    /// Seconds after which an open reservation expires.
    pub timeout: u32,

    /// Number of servers started at launch.
    pub initial_servers: u32,

    /// Seconds the estimator takes to contact all servers once.
    pub estimator_roundtrip_time: u32,

    /// Number of threads the transport uses to call the balancer.
    pub balancer_threads: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tickets: 1000,
            timeout: 10,
            initial_servers: 2,
            estimator_roundtrip_time: 10,
            balancer_threads: num_cpus::get() as u32,
        }
    }
}

impl Config {
    pub fn with_tickets(mut self, tickets: u32) -> Self {
        self.tickets = tickets;
        self
    }

    pub fn with_timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_initial_servers(mut self, initial_servers: u32) -> Self {
        self.initial_servers = initial_servers;
        self
    }

    pub fn with_estimator_roundtrip_time(mut self, secs: u32) -> Self {
        self.estimator_roundtrip_time = secs;
        self
    }

    pub fn with_balancer_threads(mut self, threads: u32) -> Self {
        self.balancer_threads = threads;
        self
    }
}
