//! Seams for the external collaborators of the verification pipeline.
//!
//! The core stays free of networking and PKI plumbing: anything that
//! reaches a trust store or a service endpoint enters through one of these
//! traits. The client crate supplies transport-backed implementations;
//! tests plug in deterministic fakes.

use crate::error::KsiResult;
use crate::signature::CalendarChain;

/// Validates PKI signatures against the embedder's trust store.
pub trait PkiVerifier {
    /// Verifies the CMS/PKCS#7 signature of the publications file.
    ///
    /// `signed_bytes` is the exact span the signature covers (everything
    /// preceding the signature element). When `expected_cert_email` is
    /// set, the signing certificate must carry that e-mail address.
    fn verify_cms(
        &self,
        signed_bytes: &[u8],
        signature: &[u8],
        expected_cert_email: Option<&str>,
    ) -> KsiResult<()>;

    /// Verifies a detached PKI signature, as carried by a calendar
    /// authentication record.
    fn verify_signature(
        &self,
        data: &[u8],
        signature: &[u8],
        signature_algorithm: &str,
        certificate_id: &[u8],
    ) -> KsiResult<()>;
}

/// Obtains calendar hash chains from the extension service.
pub trait ExtendProvider {
    /// Requests the calendar chain anchoring `aggregation_time`, extended
    /// to `publication_time` when given, or to the service's latest
    /// published second otherwise.
    fn extend(
        &mut self,
        aggregation_time: u64,
        publication_time: Option<u64>,
    ) -> KsiResult<CalendarChain>;
}
