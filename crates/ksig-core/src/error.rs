//! Error taxonomy shared by every layer of the client.
//!
//! The variants fall into the groups used throughout the crate:
//! argument/format, resource, crypto, network, service and verification.
//! Service errors carry both the internal classification and the status
//! code received on the wire, so callers can log the exact server answer
//! while matching on the coarse kind.

use thiserror::Error;

/// Convenience alias used by every fallible operation in the crate.
pub type KsiResult<T> = Result<T, KsiError>;

#[derive(Debug, Error)]
pub enum KsiError {
    // Argument / format.
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("TLV payload type mismatch")]
    PayloadTypeMismatch,

    // Resource.
    #[error("out of memory")]
    OutOfMemory,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // Crypto.
    #[error("the hash algorithm is not trusted")]
    UntrustedHashAlgorithm,
    #[error("the hash algorithm is not implemented or unavailable")]
    UnavailableHashAlgorithm,
    #[error("cryptographic failure")]
    CryptoFailure,
    #[error("HMAC mismatch")]
    HmacMismatch,
    #[error("invalid PKI signature: {0}")]
    InvalidPkiSignature(String),
    #[error("the PKI certificate is not trusted: {0}")]
    PkiCertificateNotTrusted(String),

    // Network.
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("network connection timeout")]
    NetworkConnectionTimeout,
    #[error("network send timeout")]
    NetworkSendTimeout,
    #[error("network receive timeout")]
    NetworkReceiveTimeout,
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    // Service answers, mapped through the aggregator/extender tables.
    #[error("service error {wire_status:#06x}: {message}")]
    Service {
        kind: ServiceErrorKind,
        wire_status: u64,
        message: String,
    },

    // Verification.
    #[error("verification failed")]
    VerificationFailure,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid publication: {0}")]
    InvalidPublication(String),
    #[error("the given calendar chain is not a continuation of the signature calendar chain")]
    ExtendWrongCalChain,
    #[error("there is no suitable publication yet")]
    ExtendNoSuitablePublication,
}

impl KsiError {
    /// Builds an [`KsiError::InvalidFormat`] from anything printable.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        KsiError::InvalidFormat(msg.into())
    }

    /// Stable, human-readable description of the error class, independent
    /// of any per-instance detail. Useful for log lines and status dumps.
    pub fn status_text(&self) -> &'static str {
        match self {
            KsiError::InvalidArgument => "Invalid argument.",
            KsiError::InvalidFormat(_) => "Invalid format.",
            KsiError::BufferOverflow => "Buffer overflow.",
            KsiError::PayloadTypeMismatch => "TLV payload type mismatch.",
            KsiError::OutOfMemory => "Out of memory.",
            KsiError::Io(_) => "I/O error.",
            KsiError::UntrustedHashAlgorithm => "The hash algorithm is not trusted.",
            KsiError::UnavailableHashAlgorithm => {
                "The hash algorithm is not implemented or unavailable."
            }
            KsiError::CryptoFailure => "Cryptographic failure.",
            KsiError::HmacMismatch => "HMAC mismatch.",
            KsiError::InvalidPkiSignature(_) => "Invalid PKI signature.",
            KsiError::PkiCertificateNotTrusted(_) => "The PKI certificate is not trusted.",
            KsiError::NetworkError(_) => "Network error.",
            KsiError::NetworkConnectionTimeout => "Network connection timeout.",
            KsiError::NetworkSendTimeout => "Network send timeout.",
            KsiError::NetworkReceiveTimeout => "Network receive timeout.",
            KsiError::HttpError(_) => "HTTP error.",
            KsiError::Service { kind, .. } => kind.status_text(),
            KsiError::VerificationFailure => "Verification failed.",
            KsiError::InvalidSignature(_) => "Invalid signature.",
            KsiError::InvalidPublication(_) => "Invalid publication.",
            KsiError::ExtendWrongCalChain => {
                "The given calendar chain is not a continuation of the signature calendar chain."
            }
            KsiError::ExtendNoSuitablePublication => "There is no suitable publication yet.",
        }
    }
}

/// Coarse classification of an error answer received from the aggregation
/// or extension service. The wire status that produced the kind travels
/// alongside it in [`KsiError::Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidRequest,
    AuthenticationFailure,
    InvalidPayload,
    RequestTooLarge,
    OverQuota,
    InternalError,
    UpstreamError,
    UpstreamTimeout,
    InvalidTimeRange,
    TimeTooOld,
    TimeTooNew,
    TimeInFuture,
    DatabaseMissing,
    DatabaseCorrupt,
    Unknown,
}

impl ServiceErrorKind {
    pub fn status_text(&self) -> &'static str {
        match self {
            ServiceErrorKind::InvalidRequest => "The request had invalid format.",
            ServiceErrorKind::AuthenticationFailure => "The request could not be authenticated.",
            ServiceErrorKind::InvalidPayload => "The request contained invalid payload.",
            ServiceErrorKind::RequestTooLarge => {
                "The request indicated a client-side aggregation tree larger than allowed."
            }
            ServiceErrorKind::OverQuota => {
                "The request would exceed the aggregation quota for the client in this round."
            }
            ServiceErrorKind::InternalError => {
                "The server encountered an unspecified internal error."
            }
            ServiceErrorKind::UpstreamError => {
                "The server encountered critical errors connecting to upstream servers."
            }
            ServiceErrorKind::UpstreamTimeout => "No response from upstream servers.",
            ServiceErrorKind::InvalidTimeRange => {
                "The request asked for a hash chain going backwards in time."
            }
            ServiceErrorKind::TimeTooOld => {
                "The request asked for hash values older than the oldest round in the database."
            }
            ServiceErrorKind::TimeTooNew => {
                "The request asked for hash values newer than the newest round in the database."
            }
            ServiceErrorKind::TimeInFuture => {
                "The request asked for hash values newer than the current real time."
            }
            ServiceErrorKind::DatabaseMissing => {
                "The server misses the internal database needed to service the request."
            }
            ServiceErrorKind::DatabaseCorrupt => {
                "The server's internal database is in an inconsistent state."
            }
            ServiceErrorKind::Unknown => "Unknown service error.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let err = KsiError::invalid_format("chain level out of range");
        assert_eq!(err.to_string(), "invalid format: chain level out of range");
        assert_eq!(err.status_text(), "Invalid format.");
    }

    #[test]
    fn service_error_keeps_wire_status() {
        let err = KsiError::Service {
            kind: ServiceErrorKind::OverQuota,
            wire_status: 0x0105,
            message: "quota exceeded".into(),
        };
        assert!(err.to_string().contains("0x0105"));
        assert_eq!(
            err.status_text(),
            "The request would exceed the aggregation quota for the client in this round."
        );
    }
}
