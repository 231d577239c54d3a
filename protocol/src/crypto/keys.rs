//! # RSA Key Material
//!
//! Plain textbook-RSA keys back the blind-signature envelope of the coin
//! issuance flow. Padding schemes deliberately do not appear here: the
//! protocol signs blinded group elements, never attacker-chosen plaintext,
//! and the verification equations in [`crate::coin`] are the only consumers.

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MILLER_RABIN_ROUNDS;
use crate::crypto::bigmath::{abbrev, mod_inverse, random_prime};
use crate::error::{CashError, Result};

/// Public exponent. The Fermat prime F4, as used essentially everywhere.
const PUBLIC_EXPONENT: u32 = 65537;

/// How many (p, q) pairs to try before declaring the RNG broken. A pair is
/// only rejected when `gcd(e, φ(n)) ≠ 1` or `p = q`, both vanishingly rare.
const MAX_KEYGEN_ATTEMPTS: u32 = 32;

/// An RSA keypair: primes, modulus, and both exponents.
///
/// Owned exclusively by the entity that generated it; only `(n, e)` ever
/// leave through a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaKey {
    /// First prime factor.
    pub p: BigUint,
    /// Second prime factor.
    pub q: BigUint,
    /// Modulus `n = p · q`.
    pub n: BigUint,
    /// Public exponent.
    pub e: BigUint,
    /// Private exponent, `e · d ≡ 1 (mod φ(n))`.
    pub d: BigUint,
}

impl RsaKey {
    /// Generates a fresh key with a modulus of `bits` bits.
    pub fn generate(bits: u64) -> Result<Self> {
        let e = BigUint::from(PUBLIC_EXPONENT);
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            let p = random_prime(bits / 2, MILLER_RABIN_ROUNDS);
            let q = random_prime(bits / 2, MILLER_RABIN_ROUNDS);
            if p == q {
                continue;
            }
            let phi = (&p - BigUint::one()) * (&q - BigUint::one());
            let Some(d) = mod_inverse(&e, &phi) else {
                continue;
            };
            let n = &p * &q;
            return Ok(RsaKey { p, q, n, e, d });
        }
        Err(CashError::RngFailure(format!(
            "rsa keygen failed after {MAX_KEYGEN_ATTEMPTS} attempts"
        )))
    }
}

impl fmt::Display for RsaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RsaKey {{")?;
        writeln!(f, "# N: {}", abbrev(&self.n, 100))?;
        writeln!(f, "# E: {}", abbrev(&self.e, 100))?;
        writeln!(f, "# D: {}", abbrev(&self.d, 100))?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn generated_key_satisfies_rsa_invariants() {
        let key = RsaKey::generate(512).unwrap();
        assert_eq!(key.n, &key.p * &key.q);
        let phi = (&key.p - BigUint::one()) * (&key.q - BigUint::one());
        assert_eq!((&key.e * &key.d) % phi, BigUint::one());
    }

    #[test]
    fn sign_verify_round_trip() {
        let key = RsaKey::generate(512).unwrap();
        let m = BigUint::from(0xDEADBEEFu64) % &key.n;
        let sig = m.modpow(&key.d, &key.n);
        assert_eq!(sig.modpow(&key.e, &key.n), m);
    }

    #[test]
    fn private_key_does_not_leak_through_display() {
        let key = RsaKey::generate(512).unwrap();
        let shown = key.to_string();
        // Display truncates to 100 digits; the full private exponent of a
        // 512-bit key is ~154 digits and must not appear verbatim.
        assert!(!shown.contains(&key.d.to_string()));
    }
}
