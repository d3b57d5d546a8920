//! Hash utilities

use digest::Digest;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// SHA-1 over the concatenation of `parts`
pub fn sha1_digest(parts: &[&[u8]]) -> Vec<u8> {
    digest_parts::<Sha1>(parts)
}

/// SHA-256 over the concatenation of `parts`
pub fn sha256_digest(parts: &[&[u8]]) -> Vec<u8> {
    digest_parts::<Sha256>(parts)
}

fn digest_parts<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Compare two byte strings without leaking the position of the first mismatch.
///
/// Slices of different length compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
