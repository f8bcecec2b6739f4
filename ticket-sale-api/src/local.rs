//! # Local Transport
//!
//! An in-process [`RawRequest`] implementation. Each [`LocalRequest`] carries a
//! one-shot reply channel; whichever thread answers the request resolves the
//! channel with a [`Response`]. The receiving side can wait either from a plain
//! thread (`blocking_recv`) or from async code (`.await`).

use tokio::sync::oneshot;

use crate::errors::NoResponse;
use crate::ids::{CustomerId, ServerId};
use crate::request::{RawRequest, Request, RequestHandler, RequestKind, RequestMethod};

/// A reply delivered through the local transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Int {
        value: u32,
        customer: CustomerId,
        server: Option<ServerId>,
    },
    Text {
        text: String,
        customer: CustomerId,
        server: Option<ServerId>,
    },
    SoldOut {
        customer: CustomerId,
        server: Option<ServerId>,
    },
    Error {
        message: String,
        customer: CustomerId,
        server: Option<ServerId>,
    },
    ServerList(Vec<ServerId>),
}

impl Response {
    /// Server id echoed in the reply, if any.
    pub fn server(&self) -> Option<ServerId> {
        match self {
            Response::Int { server, .. }
            | Response::Text { server, .. }
            | Response::SoldOut { server, .. }
            | Response::Error { server, .. } => *server,
            Response::ServerList(_) => None,
        }
    }

    pub fn int(&self) -> Option<u32> {
        match self {
            Response::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Response::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_sold_out(&self) -> bool {
        matches!(self, Response::SoldOut { .. })
    }
}

/// Transport half of a request answered through a one-shot channel.
#[derive(Debug)]
pub struct LocalRequest {
    kind: RequestKind,
    payload: Option<u32>,
    reply: oneshot::Sender<Response>,
}

impl LocalRequest {
    /// Build a [`Request`] together with the receiver its reply arrives on.
    pub fn new(
        kind: RequestKind,
        customer: CustomerId,
        server: Option<ServerId>,
        payload: Option<u32>,
    ) -> (Request, oneshot::Receiver<Response>) {
        let (reply, rx) = oneshot::channel();
        let raw = Box::new(LocalRequest { kind, payload, reply });
        (Request::from_raw(kind, customer, server, raw), rx)
    }

    /// Hand a request to `handler` and block the calling thread until it is answered.
    ///
    /// Must not be called from within an async runtime worker.
    pub fn call<H: RequestHandler>(
        handler: &H,
        kind: RequestKind,
        customer: CustomerId,
        server: Option<ServerId>,
        payload: Option<u32>,
    ) -> Result<Response, NoResponse> {
        let (request, rx) = Self::new(kind, customer, server, payload);
        handler.handle(request);
        rx.blocking_recv().map_err(|_| NoResponse { kind })
    }

    fn deliver(self, response: Response) {
        // The caller may have stopped waiting; nothing left to do then.
        let _ = self.reply.send(response);
    }
}

impl RawRequest for LocalRequest {
    fn url(&self) -> &str {
        match self.kind {
            RequestKind::GetNumServers | RequestKind::SetNumServers => "/api/admin/num_servers",
            RequestKind::GetServers => "/api/admin/get_servers",
            RequestKind::NumAvailableTickets => "/api/num_available_tickets",
            RequestKind::ReserveTicket => "/api/reserve_ticket",
            RequestKind::BuyTicket => "/api/buy_ticket",
            RequestKind::AbortPurchase => "/api/abort_purchase",
            RequestKind::Debug => "/api/debug",
        }
    }

    fn method(&self) -> RequestMethod {
        match self.kind {
            RequestKind::GetNumServers
            | RequestKind::GetServers
            | RequestKind::NumAvailableTickets
            | RequestKind::Debug => RequestMethod::Get,
            _ => RequestMethod::Post,
        }
    }

    fn take_u32(&mut self) -> Option<u32> {
        self.payload.take()
    }

    fn respond_with_err(self: Box<Self>, message: String, customer: CustomerId, server: Option<ServerId>) {
        self.deliver(Response::Error { message, customer, server });
    }

    fn respond_with_int(self: Box<Self>, value: u32, customer: CustomerId, server: Option<ServerId>) {
        self.deliver(Response::Int { value, customer, server });
    }

    fn respond_with_string(self: Box<Self>, text: String, customer: CustomerId, server: Option<ServerId>) {
        self.deliver(Response::Text { text, customer, server });
    }

    fn respond_with_sold_out(self: Box<Self>, customer: CustomerId, server: Option<ServerId>) {
        self.deliver(Response::SoldOut { customer, server });
    }

    fn respond_with_server_list(self: Box<Self>, servers: &[ServerId]) {
        self.deliver(Response::ServerList(servers.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_consumed_once() {
        let (mut request, _rx) =
            LocalRequest::new(RequestKind::BuyTicket, CustomerId::random(), None, Some(7));
        assert_eq!(request.read_u32(), Some(7));
        assert_eq!(request.read_u32(), None);
    }

    #[test]
    fn test_response_carries_pinned_server() {
        let customer = CustomerId::random();
        let server = ServerId::random();
        let (mut request, rx) = LocalRequest::new(RequestKind::ReserveTicket, customer, None, None);
        request.set_server_id(server);
        request.respond_with_int(3);

        let response = rx.blocking_recv().unwrap();
        assert_eq!(response.int(), Some(3));
        assert_eq!(response.server(), Some(server));
        assert!(matches!(response, Response::Int { customer: c, .. } if c == customer));
    }

    #[test]
    fn test_methods_by_kind() {
        let (request, _rx) = LocalRequest::new(RequestKind::GetServers, CustomerId::random(), None, None);
        assert_eq!(request.method(), RequestMethod::Get);
        let (request, _rx) = LocalRequest::new(RequestKind::SetNumServers, CustomerId::random(), None, Some(2));
        assert_eq!(request.method(), RequestMethod::Post);
        assert_eq!(request.url(), "/api/admin/num_servers");
    }
}
