use std::time::Duration;

use ticket_sale_api::Config;

pub const DEFAULT_ESTIMATOR_FALLBACK: Duration = Duration::from_millis(100);
pub const DEFAULT_INSPECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SPARE_RECORDS: usize = 8;

/// Runtime tuning of the rocket, derived from the launcher's [`Config`].
#[derive(Clone, Debug)]
pub struct RocketConfig {
    /// Number of tickets the database starts with.
    pub tickets: u32,

    /// Number of servers started at launch.
    pub initial_servers: u32,

    /// Age after which an open reservation expires.
    pub reservation_timeout: Duration,

    /// Time the estimator takes for one sweep over all servers.
    pub estimator_roundtrip: Duration,

    /// How long the estimator waits before retrying when no server is known.
    pub estimator_fallback: Duration,

    /// Upper bound on waiting for a server to answer an inspection.
    pub inspect_timeout: Duration,

    /// Number of terminated server records kept around for reuse.
    pub spare_records: usize,
}

impl Default for RocketConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RocketConfig {
    /// Derive the runtime tuning from the launcher configuration. Values the
    /// launcher does not know about take their defaults.
    pub fn from_config(config: &Config) -> Self {
        Self {
            tickets: config.tickets,
            initial_servers: config.initial_servers,
            reservation_timeout: Duration::from_secs(u64::from(config.timeout)),
            estimator_roundtrip: Duration::from_secs(u64::from(config.estimator_roundtrip_time)),
            estimator_fallback: DEFAULT_ESTIMATOR_FALLBACK,
            inspect_timeout: DEFAULT_INSPECT_TIMEOUT,
            spare_records: DEFAULT_SPARE_RECORDS,
        }
    }

    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }

    pub fn with_estimator_roundtrip(mut self, roundtrip: Duration) -> Self {
        self.estimator_roundtrip = roundtrip;
        self
    }

    pub fn with_estimator_fallback(mut self, fallback: Duration) -> Self {
        self.estimator_fallback = fallback;
        self
    }

    pub fn with_inspect_timeout(mut self, timeout: Duration) -> Self {
        self.inspect_timeout = timeout;
        self
    }

    pub fn with_spare_records(mut self, spare: usize) -> Self {
        self.spare_records = spare;
        self
    }

    /// Pause between two estimator probes so that one sweep over
    /// `servers` servers takes about one roundtrip.
    pub fn probe_interval(&self, servers: usize) -> Duration {
        if servers == 0 {
            return self.estimator_fallback;
        }
        self.estimator_roundtrip / servers as u32
    }
}
