//! Error types of the request boundary.

use thiserror::Error;

use crate::request::RequestKind;

/// A request was dropped by the handler without being answered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind:?} request was dropped without a response")]
pub struct NoResponse {
    pub kind: RequestKind,
}

/// Failure to decode an identifier from its textual wire form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    /// The header value is not a valid UUID.
    #[error("Invalid {kind} id '{value}': {reason}")]
    InvalidUuid {
        /// Which identifier was being parsed ("customer" or "server")
        kind: &'static str,
        /// The offending input
        value: String,
        /// Reason reported by the UUID parser
        reason: String,
    },
}
