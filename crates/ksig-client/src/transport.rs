//! The transport seam.
//!
//! The core never talks to the network itself; the embedder supplies a
//! [`Transport`] that moves request bytes to a service endpoint and brings
//! the response bytes back. HTTP, TCP or an in-memory fake all fit behind
//! the same call.

use std::time::Duration;

use ksig_core::error::KsiResult;

/// Which service an exchange addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Aggregator,
    Extender,
    PublicationsFile,
}

/// A resolved service endpoint with its timeout budget.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub uri: String,
    /// Budget for establishing the connection; overruns surface as
    /// `NetworkConnectionTimeout`.
    pub connect_timeout: Duration,
    /// Budget for the transfer itself; overruns surface as
    /// `NetworkSendTimeout` / `NetworkReceiveTimeout`.
    pub transfer_timeout: Duration,
}

impl Endpoint {
    pub fn new(
        kind: EndpointKind,
        uri: impl Into<String>,
        connect_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        Endpoint {
            kind,
            uri: uri.into(),
            connect_timeout,
            transfer_timeout,
        }
    }
}

/// One blocking request/response exchange.
///
/// Implementations map their failures onto the network error taxonomy:
/// connection problems to `NetworkError`/`NetworkConnectionTimeout`,
/// transfer overruns to the send/receive timeout variants, and HTTP-level
/// failures to `HttpError`. The publications-file request carries an empty
/// request body.
pub trait Transport {
    fn exchange(&mut self, endpoint: &Endpoint, request: &[u8]) -> KsiResult<Vec<u8>>;
}
