//! # Requests
//!
//! ## Key Concepts
//! - [`Request`]: one inbound call, already classified by kind
//! - [`RawRequest`]: the transport half of a request (payload and reply path)
//! - [`RequestHandler`]: the entry point the transport drives, usually from many threads
//!
//! ## Response Discipline
//! Every response method takes the request by value, so a request can be
//! answered exactly once and cannot be forgotten after being answered.

use std::fmt;

use crate::ids::{CustomerId, ServerId};

/// Kind of a request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RequestKind {
    /// Number of active servers. Answered by the balancer.
    GetNumServers,
    /// Scale to the number of servers in the payload. Answered by the balancer
    /// with the resulting number of active servers.
    SetNumServers,
    /// Ids of all active servers. Answered by the balancer.
    GetServers,
    /// Approximate number of tickets still available. Answered by a server.
    NumAvailableTickets,
    /// Reserve a ticket. Answered by a server.
    ReserveTicket,
    /// Buy the reserved ticket whose id is in the payload. Answered by a server.
    BuyTicket,
    /// Give back the reserved ticket whose id is in the payload. Answered by a server.
    AbortPurchase,
    /// Free-form diagnostics.
    Debug,
}

impl RequestKind {
    /// Whether the balancer answers this kind itself instead of forwarding it.
    pub const fn is_pool_management(&self) -> bool {
        matches!(
            self,
            RequestKind::GetNumServers
                | RequestKind::SetNumServers
                | RequestKind::GetServers
                | RequestKind::Debug
        )
    }
}

/// Request method.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RequestMethod {
    /// Read-only request.
    Get,
    /// Mutating request, may carry a payload.
    Post,
}

/// Transport half of a request.
///
/// Implemented by whatever turns network calls into [`Request`]s. The
/// `respond_*` methods consume the boxed request and must deliver the reply
/// before returning.
pub trait RawRequest {
    /// The request URL.
    fn url(&self) -> &str;

    /// The request method.
    fn method(&self) -> RequestMethod;

    /// Take the integer payload. Returns [`None`] if there is none, if it does
    /// not parse, or if it was already taken.
    fn take_u32(&mut self) -> Option<u32>;

    /// Respond with an error message.
    fn respond_with_err(self: Box<Self>, err: String, customer: CustomerId, server: Option<ServerId>);

    /// Respond with an integer.
    fn respond_with_int(self: Box<Self>, int: u32, customer: CustomerId, server: Option<ServerId>);

    /// Respond with a string.
    fn respond_with_string(self: Box<Self>, s: String, customer: CustomerId, server: Option<ServerId>);

    /// Respond with the sold-out marker.
    fn respond_with_sold_out(self: Box<Self>, customer: CustomerId, server: Option<ServerId>);

    /// Respond with a list of server ids.
    fn respond_with_server_list(self: Box<Self>, servers: &[ServerId]);
}

/// A classified inbound request.
pub struct Request {
    kind: RequestKind,
    customer: CustomerId,
    server: Option<ServerId>,
    raw: Box<dyn RawRequest + Send>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("customer", &self.customer)
            .field("server", &self.server)
            .field("raw", &"<raw-request>")
            .finish()
    }
}

impl Request {
    /// Create a request from its transport half.
    pub fn from_raw(
        kind: RequestKind,
        customer: CustomerId,
        server: Option<ServerId>,
        raw: Box<dyn RawRequest + Send>,
    ) -> Self {
        Self {
            kind,
            customer,
            server,
            raw,
        }
    }

    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    #[inline]
    pub fn method(&self) -> RequestMethod {
        self.raw.method()
    }

    #[inline]
    pub fn url(&self) -> &str {
        self.raw.url()
    }

    /// The customer this request belongs to.
    #[inline]
    pub fn customer_id(&self) -> CustomerId {
        self.customer
    }

    /// The server the customer is pinned to, if any.
    #[inline]
    pub fn server_id(&self) -> Option<ServerId> {
        self.server
    }

    /// Pin the customer to a server. The id is echoed in the response.
    #[inline]
    pub fn set_server_id(&mut self, server: ServerId) {
        self.server = Some(server);
    }

    /// Read the integer payload (a ticket id or a server count).
    ///
    /// The payload is consumed: a second call returns [`None`].
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.raw.take_u32()
    }

    pub fn respond_with_err(self, err: impl Into<String>) {
        self.raw.respond_with_err(err.into(), self.customer, self.server);
    }

    pub fn respond_with_int(self, int: u32) {
        self.raw.respond_with_int(int, self.customer, self.server);
    }

    pub fn respond_with_string(self, s: impl Into<String>) {
        self.raw.respond_with_string(s.into(), self.customer, self.server);
    }

    /// Tell the customer that no tickets are left.
    pub fn respond_with_sold_out(self) {
        self.raw.respond_with_sold_out(self.customer, self.server);
    }

    pub fn respond_with_server_list(self, servers: &[ServerId]) {
        self.raw.respond_with_server_list(servers);
    }
}

/// Entry point of the ticket sale system.
pub trait RequestHandler {
    /// Handle one request. May be called concurrently from many threads.
    fn handle(&self, request: Request);

    /// Shut the system down, waiting for every thread it spawned to exit.
    fn shutdown(self);
}
