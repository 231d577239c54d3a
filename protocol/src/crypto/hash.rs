//! # Digest Helpers
//!
//! SHA-256 over big-endian integer encodings, interpreted back as integers —
//! the hash shape every verification equation in the scheme consumes — plus
//! the truncated 128-bit profile digests the ledger keys on.
//!
//! Timestamps enter digests through one pinned encoding:
//! [`timestamp_bytes`], the UTC millisecond count as 8 big-endian bytes.
//! Both the coin expiration signature and the merchant challenge use it;
//! changing it invalidates every coin in circulation.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::config::PROFILE_DIGEST_BYTES;

/// SHA-256 over the concatenated big-endian encodings of `parts`,
/// interpreted as a big-endian integer.
pub fn sha256_uint(parts: &[&BigUint]) -> BigUint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.to_bytes_be());
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// SHA-256 over raw byte slices, interpreted as a big-endian integer.
pub fn sha256_bytes_uint(parts: &[&[u8]]) -> BigUint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Truncated profile digest: the first 16 bytes of SHA-256 over `parts`,
/// as a `u128`. Used as the unique ledger key for client and coin profiles.
pub fn digest128(parts: &[&[u8]]) -> u128 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut truncated = [0u8; PROFILE_DIGEST_BYTES];
    truncated.copy_from_slice(&digest[..PROFILE_DIGEST_BYTES]);
    u128::from_be_bytes(truncated)
}

/// The pinned digest encoding for timestamps: milliseconds since the Unix
/// epoch (UTC) as 8 big-endian bytes.
pub fn timestamp_bytes(t: &DateTime<Utc>) -> [u8; 8] {
    t.timestamp_millis().to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sha256_uint_matches_byte_hash() {
        let a = BigUint::from(0x0102u32);
        let b = BigUint::from(0x03u32);
        let via_ints = sha256_uint(&[&a, &b]);
        let via_bytes = sha256_bytes_uint(&[&[1u8, 2, 3]]);
        assert_eq!(via_ints, via_bytes);
    }

    #[test]
    fn digest128_is_prefix_of_sha256() {
        let full = Sha256::digest(b"aurum");
        let truncated = digest128(&[b"aurum"]);
        assert_eq!(&full[..16], &truncated.to_be_bytes());
    }

    #[test]
    fn digest128_distinguishes_inputs() {
        assert_ne!(digest128(&[b"coin-1"]), digest128(&[b"coin-2"]));
    }

    #[test]
    fn timestamp_encoding_is_stable() {
        let t = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            timestamp_bytes(&t),
            t.timestamp_millis().to_be_bytes()
        );
        // Distinct instants encode differently at millisecond granularity.
        let later = t + chrono::Duration::milliseconds(1);
        assert_ne!(timestamp_bytes(&t), timestamp_bytes(&later));
    }
}
