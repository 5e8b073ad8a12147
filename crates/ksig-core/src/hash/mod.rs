//! Hash algorithms and algorithm-tagged digests (imprints).
//!
//! An *imprint* is the on-wire form of a digest: one algorithm byte
//! followed by the fixed-length digest for that algorithm. Every hash the
//! calendar infrastructure exchanges travels as an imprint, so equality is
//! always on the `(algorithm, digest)` pair, never on bare bytes.

mod hasher;

pub use hasher::{Hasher, hmac};

use std::fmt;

use crate::error::{KsiError, KsiResult};

/// Hash algorithm identifiers as assigned on the wire.
///
/// The full identifier space is representable so foreign imprints can be
/// parsed and compared; only the SHA-1/SHA-2/RIPEMD families are backed by
/// an implementation here (see [`HashAlgorithm::is_implemented`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HashAlgorithm {
    Sha1 = 0x00,
    Sha2_256 = 0x01,
    Ripemd160 = 0x02,
    Sha2_224 = 0x03,
    Sha2_384 = 0x04,
    Sha2_512 = 0x05,
    Ripemd256 = 0x06,
    Sha3_224 = 0x07,
    Sha3_256 = 0x08,
    Sha3_384 = 0x09,
    Sha3_512 = 0x0a,
    Sm3 = 0x0b,
}

impl HashAlgorithm {
    /// All identifiers this build knows about, in wire order.
    pub const ALL: [HashAlgorithm; 12] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha2_256,
        HashAlgorithm::Ripemd160,
        HashAlgorithm::Sha2_224,
        HashAlgorithm::Sha2_384,
        HashAlgorithm::Sha2_512,
        HashAlgorithm::Ripemd256,
        HashAlgorithm::Sha3_224,
        HashAlgorithm::Sha3_256,
        HashAlgorithm::Sha3_384,
        HashAlgorithm::Sha3_512,
        HashAlgorithm::Sm3,
    ];

    /// Decodes a wire identifier byte.
    pub fn from_wire(id: u8) -> KsiResult<Self> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| KsiError::invalid_format(format!("unknown hash algorithm id {id:#04x}")))
    }

    /// The wire identifier byte.
    pub fn wire_id(self) -> u8 {
        self as u8
    }

    /// Fixed digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 | HashAlgorithm::Ripemd160 => 20,
            HashAlgorithm::Sha2_224 | HashAlgorithm::Sha3_224 => 28,
            HashAlgorithm::Sha2_256
            | HashAlgorithm::Ripemd256
            | HashAlgorithm::Sha3_256
            | HashAlgorithm::Sm3 => 32,
            HashAlgorithm::Sha2_384 | HashAlgorithm::Sha3_384 => 48,
            HashAlgorithm::Sha2_512 | HashAlgorithm::Sha3_512 => 64,
        }
    }

    /// Whether this build can actually compute the digest.
    pub fn is_implemented(self) -> bool {
        !matches!(
            self,
            HashAlgorithm::Sha3_224
                | HashAlgorithm::Sha3_256
                | HashAlgorithm::Sha3_384
                | HashAlgorithm::Sha3_512
                | HashAlgorithm::Sm3
        )
    }

    /// Whether the algorithm is still considered collision-resistant enough
    /// for new signatures. Verification of existing material accepts
    /// untrusted algorithms; signing refuses them.
    pub fn is_trusted(self) -> bool {
        !matches!(self, HashAlgorithm::Sha1)
    }

    /// Canonical lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha2_256 => "sha2-256",
            HashAlgorithm::Ripemd160 => "ripemd160",
            HashAlgorithm::Sha2_224 => "sha2-224",
            HashAlgorithm::Sha2_384 => "sha2-384",
            HashAlgorithm::Sha2_512 => "sha2-512",
            HashAlgorithm::Ripemd256 => "ripemd256",
            HashAlgorithm::Sha3_224 => "sha3-224",
            HashAlgorithm::Sha3_256 => "sha3-256",
            HashAlgorithm::Sha3_384 => "sha3-384",
            HashAlgorithm::Sha3_512 => "sha3-512",
            HashAlgorithm::Sm3 => "sm3",
        }
    }

    /// Looks an algorithm up by name, tolerating case and `-`/`_`
    /// separators. `"default"` resolves to SHA2-256. A bare family name
    /// resolves only where unambiguous (`"sha2"` is SHA2-256, `"sha3"` is
    /// not a name).
    pub fn by_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "default" | "sha2" | "sha2256" | "sha256" => Some(HashAlgorithm::Sha2_256),
            "sha1" => Some(HashAlgorithm::Sha1),
            "ripemd160" => Some(HashAlgorithm::Ripemd160),
            "sha2224" | "sha224" => Some(HashAlgorithm::Sha2_224),
            "sha2384" | "sha384" => Some(HashAlgorithm::Sha2_384),
            "sha2512" | "sha512" => Some(HashAlgorithm::Sha2_512),
            "ripemd256" => Some(HashAlgorithm::Ripemd256),
            "sha3224" => Some(HashAlgorithm::Sha3_224),
            "sha3256" => Some(HashAlgorithm::Sha3_256),
            "sha3384" => Some(HashAlgorithm::Sha3_384),
            "sha3512" => Some(HashAlgorithm::Sha3_512),
            "sm3" => Some(HashAlgorithm::Sm3),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An algorithm-tagged digest.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Imprint {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl Imprint {
    /// Builds an imprint from its parts, validating the digest length.
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> KsiResult<Self> {
        if digest.len() != algorithm.digest_len() {
            return Err(KsiError::invalid_format(format!(
                "digest length {} does not match {} (expected {})",
                digest.len(),
                algorithm,
                algorithm.digest_len()
            )));
        }
        Ok(Imprint { algorithm, digest })
    }

    /// Parses the wire form: algorithm byte followed by the digest.
    pub fn from_wire(bytes: &[u8]) -> KsiResult<Self> {
        let (&id, digest) = bytes
            .split_first()
            .ok_or_else(|| KsiError::invalid_format("empty imprint"))?;
        Imprint::new(HashAlgorithm::from_wire(id)?, digest.to_vec())
    }

    /// Serializes to the wire form.
    pub fn as_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.digest.len());
        out.push(self.algorithm.wire_id());
        out.extend_from_slice(&self.digest);
        out
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
}

impl fmt::Display for Imprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.digest))
    }
}

impl fmt::Debug for Imprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imprint({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids_are_dense() {
        for (i, alg) in HashAlgorithm::ALL.iter().enumerate() {
            assert_eq!(alg.wire_id() as usize, i);
            assert_eq!(HashAlgorithm::from_wire(i as u8).unwrap(), *alg);
        }
        assert!(HashAlgorithm::from_wire(0x0c).is_err());
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            HashAlgorithm::by_name("default"),
            Some(HashAlgorithm::Sha2_256)
        );
        assert_eq!(
            HashAlgorithm::by_name("Sha-2"),
            Some(HashAlgorithm::Sha2_256)
        );
        assert_eq!(
            HashAlgorithm::by_name("Sha3_384"),
            Some(HashAlgorithm::Sha3_384)
        );
        assert_eq!(HashAlgorithm::by_name("SHA3"), None);
    }

    #[test]
    fn imprint_round_trip() {
        let imprint = Imprint::new(HashAlgorithm::Sha2_256, vec![0xab; 32]).unwrap();
        let wire = imprint.as_wire();
        assert_eq!(wire.len(), 33);
        assert_eq!(wire[0], 0x01);
        assert_eq!(Imprint::from_wire(&wire).unwrap(), imprint);
    }

    #[test]
    fn imprint_rejects_bad_length() {
        assert!(Imprint::new(HashAlgorithm::Sha2_256, vec![0; 20]).is_err());
        assert!(Imprint::from_wire(&[0x01, 0xde, 0xad]).is_err());
        assert!(Imprint::from_wire(&[]).is_err());
    }
}
