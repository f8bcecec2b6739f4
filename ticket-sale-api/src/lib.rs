//! # Ticket Sale API
//!
//! The request boundary of the ticket sale rocket. Everything a transport needs
//! to hand typed requests to the system, and everything the system needs to
//! answer them, lives here. The concurrent implementation lives in the
//! `ticket-sale` crate and only talks to the outside world through these types.
//!
//! ## Core Components
//!
//! - **Identifiers**: [`CustomerId`] and [`ServerId`], opaque UUID newtypes
//! - **Requests**: [`Request`], a typed request wrapping a transport-specific [`RawRequest`]
//! - **Handlers**: [`RequestHandler`], implemented by the load balancer
//! - **Configuration**: [`Config`], the externally supplied system parameters
//! - **Local transport**: [`LocalRequest`] and [`Response`], an in-process
//!   transport used by tests and the simulator
//!
//! ## Module Organization
//!
//! - [`ids`]: Customer and server identifiers
//! - [`request`]: Request kinds, methods and the request/handler traits
//! - [`config`]: System configuration
//! - [`local`]: Channel-backed in-process transport
//! - [`errors`]: Error types

pub mod config;
pub mod errors;
pub mod ids;
pub mod local;
pub mod request;

pub use config::Config;
pub use errors::{IdParseError, NoResponse};
pub use ids::{CustomerId, ServerId};
pub use local::{LocalRequest, Response};
pub use request::{RawRequest, Request, RequestHandler, RequestKind, RequestMethod};
