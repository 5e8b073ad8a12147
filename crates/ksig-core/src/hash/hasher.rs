//! Incremental hashing and keyed hashing over the implemented algorithms.

use hmac::{Hmac, Mac};
use ripemd::{Ripemd160, Ripemd256};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use super::{HashAlgorithm, Imprint};
use crate::error::{KsiError, KsiResult};

/// Incremental digest computation producing an [`Imprint`].
///
/// ```
/// use ksig_core::hash::{HashAlgorithm, Hasher};
///
/// let mut hasher = Hasher::open(HashAlgorithm::Sha2_256).unwrap();
/// hasher.update(b"correct horse");
/// hasher.update(b" battery staple");
/// let imprint = hasher.finalize();
/// assert_eq!(imprint.algorithm(), HashAlgorithm::Sha2_256);
/// ```
pub struct Hasher {
    state: State,
}

enum State {
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Ripemd160(Ripemd160),
    Ripemd256(Ripemd256),
}

impl Hasher {
    /// Opens a hasher for the given algorithm.
    ///
    /// Known-but-unimplemented identifiers (the SHA-3 family, SM3) fail
    /// with [`KsiError::UnavailableHashAlgorithm`].
    pub fn open(algorithm: HashAlgorithm) -> KsiResult<Self> {
        let state = match algorithm {
            HashAlgorithm::Sha1 => State::Sha1(Sha1::new()),
            HashAlgorithm::Sha2_224 => State::Sha224(Sha224::new()),
            HashAlgorithm::Sha2_256 => State::Sha256(Sha256::new()),
            HashAlgorithm::Sha2_384 => State::Sha384(Sha384::new()),
            HashAlgorithm::Sha2_512 => State::Sha512(Sha512::new()),
            HashAlgorithm::Ripemd160 => State::Ripemd160(Ripemd160::new()),
            HashAlgorithm::Ripemd256 => State::Ripemd256(Ripemd256::new()),
            _ => return Err(KsiError::UnavailableHashAlgorithm),
        };
        Ok(Hasher { state })
    }

    /// The algorithm this hasher was opened with.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self.state {
            State::Sha1(_) => HashAlgorithm::Sha1,
            State::Sha224(_) => HashAlgorithm::Sha2_224,
            State::Sha256(_) => HashAlgorithm::Sha2_256,
            State::Sha384(_) => HashAlgorithm::Sha2_384,
            State::Sha512(_) => HashAlgorithm::Sha2_512,
            State::Ripemd160(_) => HashAlgorithm::Ripemd160,
            State::Ripemd256(_) => HashAlgorithm::Ripemd256,
        }
    }

    /// Feeds more data into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Sha1(h) => h.update(data),
            State::Sha224(h) => h.update(data),
            State::Sha256(h) => h.update(data),
            State::Sha384(h) => h.update(data),
            State::Sha512(h) => h.update(data),
            State::Ripemd160(h) => h.update(data),
            State::Ripemd256(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the imprint.
    pub fn finalize(self) -> Imprint {
        let algorithm = self.algorithm();
        let digest = match self.state {
            State::Sha1(h) => h.finalize().to_vec(),
            State::Sha224(h) => h.finalize().to_vec(),
            State::Sha256(h) => h.finalize().to_vec(),
            State::Sha384(h) => h.finalize().to_vec(),
            State::Sha512(h) => h.finalize().to_vec(),
            State::Ripemd160(h) => h.finalize().to_vec(),
            State::Ripemd256(h) => h.finalize().to_vec(),
        };
        Imprint { algorithm, digest }
    }

    /// One-shot convenience over `open`/`update`/`finalize`.
    pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> KsiResult<Imprint> {
        let mut hasher = Hasher::open(algorithm)?;
        hasher.update(data);
        Ok(hasher.finalize())
    }
}

/// Computes a keyed digest of `message` under `key`, tagged with the
/// producing algorithm. Used to authenticate PDUs against the shared
/// aggregator/extender secret.
pub fn hmac(algorithm: HashAlgorithm, key: &[u8], message: &[u8]) -> KsiResult<Imprint> {
    macro_rules! keyed_digest {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key)
                .map_err(|_| KsiError::CryptoFailure)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }};
    }

    let digest = match algorithm {
        HashAlgorithm::Sha1 => keyed_digest!(Sha1),
        HashAlgorithm::Sha2_224 => keyed_digest!(Sha224),
        HashAlgorithm::Sha2_256 => keyed_digest!(Sha256),
        HashAlgorithm::Sha2_384 => keyed_digest!(Sha384),
        HashAlgorithm::Sha2_512 => keyed_digest!(Sha512),
        HashAlgorithm::Ripemd160 => keyed_digest!(Ripemd160),
        HashAlgorithm::Ripemd256 => keyed_digest!(Ripemd256),
        _ => return Err(KsiError::UnavailableHashAlgorithm),
    };
    Imprint::new(algorithm, digest)
}
