//! # ksig-client
//!
//! The embedding surface of the keyless-signature client: a per-context
//! object owning configuration, the transport handle, the PKI trust seam,
//! the publications-file cache and a fixed-size error ring.
//!
//! A [`KsiContext`] is single-threaded by design: distinct contexts are
//! fully independent and may run in parallel, but one context must not be
//! shared for concurrent mutation. Only operations that traverse the
//! transport block; hashing and verification are CPU-only.

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod error_ring;
pub mod status;
pub mod transport;

pub use config::{ClientConfig, PubFileCachePolicy, ServiceCredentials};
pub use context::KsiContext;
pub use error_ring::{ErrorEntry, ErrorRing};
pub use transport::{Endpoint, EndpointKind, Transport};

/// Version string of this client build.
pub fn version() -> &'static str {
    concat!("ksig ", env!("CARGO_PKG_VERSION"))
}
