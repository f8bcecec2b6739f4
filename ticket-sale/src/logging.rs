// Logging for the ticket sale rocket
//
// Built on the `tracing` ecosystem. Every actor thread runs inside an
// `actor_span!` so each event carries the kind and id of the actor that
// emitted it.
//
// # Usage Examples
//
// ```rust
// use ticket_sale::logging;
//
// // INFO level, human readable console output
// logging::init_default();
//
// // Or a custom configuration
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// ## Structured events
//
// ```rust
// use ticket_sale::{actor_span, log_lifecycle};
//
// let span = actor_span!("server", server_id);
// let _guard = span.enter();
// log_lifecycle!("server", server_id, "terminating", reservations = 3);
// ```

use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration of the logging system.
///
/// # Examples
///
/// ```rust
/// use ticket_sale::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     json_format: true,
///     show_file_line: false,
///     show_thread_info: true,
///     show_time: true,
///     target_filters: Some("ticket_sale=debug,ticket_sale::estimator=trace".to_string()),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

/// Initialize the logging system with the given configuration.
///
/// Sets up the global tracing subscriber. `RUST_LOG` is honored on top of the
/// configured level. Safe to call multiple times; only the first call has an
/// effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        if let Some(filters) = &config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let text_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let registry = tracing_subscriber::registry().with(env_filter);

        let subscriber: Box<dyn Subscriber + Send + Sync> = match (config.json_format, config.show_time) {
            (true, _) => Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info),
                ),
            ),
            (false, true) => Box::new(registry.with(text_layer)),
            (false, false) => Box::new(registry.with(text_layer.without_time())),
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// INFO level, human readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG level with per-message tracing of the server actors.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("ticket_sale=debug,ticket_sale::server=trace".to_string()),
    });
}

/// JSON output at INFO level for log aggregators. No file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Initialize logging for testing.
///
/// Only warnings and errors are shown to keep test output readable.
///
/// ```rust
/// #[test]
/// fn my_test() {
///     ticket_sale::logging::init_test();
///     // ...
/// }
/// ```
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Create the span an actor thread runs in.
///
/// ```rust
/// use ticket_sale::actor_span;
///
/// let span = actor_span!("estimator", "main");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! actor_span {
    ($actor_kind:expr, $actor_id:expr) => {
        tracing::info_span!("actor", kind = $actor_kind, id = %$actor_id)
    };
    ($actor_kind:expr, $actor_id:expr, $($fields:tt)*) => {
        tracing::info_span!("actor", kind = $actor_kind, id = %$actor_id, $($fields)*)
    };
}

/// Log actor lifecycle events, such as a server changing status.
///
/// ```rust
/// use ticket_sale::{ServerId, log_lifecycle};
///
/// let server_id = ServerId::random();
/// log_lifecycle!("server", server_id, "terminated");
/// log_lifecycle!("server", server_id, "terminating", reservations = 2);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($actor_kind:expr, $actor_id:expr, $event:expr) => {
        tracing::info!(actor_kind = $actor_kind, actor_id = %$actor_id, event = $event)
    };
    ($actor_kind:expr, $actor_id:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(actor_kind = $actor_kind, actor_id = %$actor_id, event = $event, $($fields)*)
    };
}

/// Log message processing events at debug level.
///
/// ```rust
/// use ticket_sale::log_message;
///
/// log_message!("ReserveTicket", "reserved", ticket = 9);
/// ```
#[macro_export]
macro_rules! log_message {
    ($message_type:expr, $status:expr) => {
        tracing::debug!(message_type = $message_type, status = $status)
    };
    ($message_type:expr, $status:expr, $($fields:tt)*) => {
        tracing::debug!(message_type = $message_type, status = $status, $($fields)*)
    };
}

/// Log system events, such as scaling and shutdown.
///
/// ```rust
/// use ticket_sale::log_system;
///
/// log_system!("scale", "completed", active = 4);
/// ```
#[macro_export]
macro_rules! log_system {
    ($operation:expr, $status:expr) => {
        tracing::info!(operation = $operation, status = $status)
    };
    ($operation:expr, $status:expr, $($fields:tt)*) => {
        tracing::info!(operation = $operation, status = $status, $($fields)*)
    };
}

/// Log faults. Use for every invariant violation.
///
/// ```rust
/// use ticket_sale::{CustomerId, ServerId, TicketError, TicketState, log_error};
///
/// let server_id = ServerId::random();
/// let customer_id = CustomerId::random();
/// let error = TicketError { ticket: 7, state: TicketState::Sold, transition: "reserve" };
/// log_error!(error, server = %server_id, customer = %customer_id);
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*)
    };
}
