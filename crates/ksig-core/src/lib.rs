//! # ksig-core
//!
//! Data model and verification engine for keyless signatures anchored to a
//! distributed hash calendar.
//!
//! A keyless signature binds a document hash at a precise second to a
//! globally unique calendar root. This crate owns the pieces that make that
//! binding checkable offline:
//!
//! - the recursive TLV wire codec ([`tlv`]),
//! - the hash-chain aggregation engine ([`hashchain`]),
//! - the typed signature container ([`signature`]),
//! - the graduated verification pipeline ([`verify`]),
//! - publication records, the publications file and the base-32
//!   publication string ([`publication`]),
//! - the aggregator/extender PDU envelopes with HMAC protection ([`pdu`]).
//!
//! Network transports, PKI trust stores and concrete service endpoints live
//! behind the seams in [`provider`]; the companion client crate wires them
//! up.

#![deny(unsafe_code)]

pub mod error;
pub mod hash;
pub mod hashchain;
pub mod pdu;
pub mod provider;
pub mod publication;
pub mod signature;
pub mod tlv;
pub mod verify;

pub use error::{KsiError, KsiResult, ServiceErrorKind};
pub use hash::{HashAlgorithm, Hasher, Imprint};
pub use signature::Signature;
pub use verify::{VerificationResult, VerificationStep, Verifier};
