//! Message digests
//!
//! `local_digest` is the in-process fast path the session tries before
//! routing a digest action to a provider. Both paths end in [`digest`], so
//! the output for a given (algorithm, data) pair never depends on the path.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::HashAlgorithm;

/// Compute the digest of `data`.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// Digest by algorithm name, or `None` when the name is not handled locally.
pub fn local_digest(algorithm: &str, data: &[u8]) -> Option<Vec<u8>> {
    let algorithm: HashAlgorithm = algorithm.parse().ok()?;
    Some(digest(algorithm, data))
}
