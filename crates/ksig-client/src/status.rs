//! Service status-code tables.
//!
//! Error answers from the aggregation and extension services carry a wire
//! status; these tables map it onto the error taxonomy while keeping the
//! original code and message alongside. The two services share the low
//! codes but diverge in the 0x0104+ range.

use ksig_core::error::{KsiError, ServiceErrorKind};

/// Maps an aggregator status code; `0` means success.
pub fn map_aggregator_status(status: u64, message: impl Into<String>) -> Option<KsiError> {
    let kind = match status {
        0x00 => return None,
        0x0101 => ServiceErrorKind::InvalidRequest,
        0x0102 => ServiceErrorKind::AuthenticationFailure,
        0x0103 => ServiceErrorKind::InvalidPayload,
        0x0104 => ServiceErrorKind::RequestTooLarge,
        0x0105 => ServiceErrorKind::OverQuota,
        0x0200 => ServiceErrorKind::InternalError,
        0x0300 => ServiceErrorKind::UpstreamError,
        0x0301 => ServiceErrorKind::UpstreamTimeout,
        _ => ServiceErrorKind::Unknown,
    };
    Some(KsiError::Service {
        kind,
        wire_status: status,
        message: message.into(),
    })
}

/// Maps an extender status code; `0` means success.
pub fn map_extender_status(status: u64, message: impl Into<String>) -> Option<KsiError> {
    let kind = match status {
        0x00 => return None,
        0x0101 => ServiceErrorKind::InvalidRequest,
        0x0102 => ServiceErrorKind::AuthenticationFailure,
        0x0103 => ServiceErrorKind::InvalidPayload,
        0x0104 => ServiceErrorKind::InvalidTimeRange,
        0x0105 => ServiceErrorKind::TimeTooOld,
        0x0106 => ServiceErrorKind::TimeTooNew,
        0x0107 => ServiceErrorKind::TimeInFuture,
        0x0200 => ServiceErrorKind::InternalError,
        0x0201 => ServiceErrorKind::DatabaseMissing,
        0x0202 => ServiceErrorKind::DatabaseCorrupt,
        0x0300 => ServiceErrorKind::UpstreamError,
        0x0301 => ServiceErrorKind::UpstreamTimeout,
        _ => ServiceErrorKind::Unknown,
    };
    Some(KsiError::Service {
        kind,
        wire_status: status,
        message: message.into(),
    })
}
