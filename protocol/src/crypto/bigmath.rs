//! # Big-Number Arithmetic
//!
//! Everything the scheme needs from arbitrary-precision integers: secure
//! sampling, Miller-Rabin primality, Sophie-Germain/safe-prime search,
//! subgroup generator selection, modular inverses, and the
//! concatenation-as-integer operation the credential math is built on.
//!
//! All sampling draws from the OS entropy source. Rejection loops are
//! bounded by [`MAX_SAMPLING_ATTEMPTS`] and fail loudly rather than spin:
//! the per-attempt success probability of every loop here is constant and
//! close to one, so exhausting the budget means something upstream is
//! broken.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

use crate::config::MAX_SAMPLING_ATTEMPTS;
use crate::error::{CashError, Result};

/// Trial-division primes. Filters out the vast majority of composite
/// candidates before the expensive Miller-Rabin rounds run.
const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67,
    71, 73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149,
    151, 157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227,
    229, 233, 239, 241, 251,
];

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Uniform random integer in `[0, bound)`.
pub fn random_below(bound: &BigUint) -> BigUint {
    debug_assert!(!bound.is_zero());
    OsRng.gen_biguint_below(bound)
}

/// Uniform random integer of at most `bits` bits.
pub fn random_bits(bits: u64) -> BigUint {
    OsRng.gen_biguint(bits)
}

/// Samples a value in `[0, modulus)` together with its inverse modulo
/// `modulus`. Retries until the draw is invertible, bounded by the global
/// attempt budget.
pub fn invertible_below(modulus: &BigUint) -> Result<(BigUint, BigUint)> {
    for _ in 0..MAX_SAMPLING_ATTEMPTS {
        let candidate = random_below(modulus);
        if let Some(inverse) = mod_inverse(&candidate, modulus) {
            return Ok((candidate, inverse));
        }
    }
    Err(CashError::RngFailure(format!(
        "no invertible residue found in {MAX_SAMPLING_ATTEMPTS} attempts"
    )))
}

// ---------------------------------------------------------------------------
// Primality
// ---------------------------------------------------------------------------

/// Miller-Rabin probabilistic primality test with `rounds` random bases.
///
/// A composite survives each round with probability at most 1/4, so the
/// result is wrong with probability at most `4^-rounds`.
pub fn is_probable_prime(n: &BigUint, rounds: u32) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // Write n - 1 = d * 2^s with d odd.
    let n_minus_1 = n - BigUint::one();
    let mut d = n_minus_1.clone();
    let mut s = 0u64;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = OsRng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Random prime of exactly `bits` bits (top and bottom bits forced).
pub fn random_prime(bits: u64, rounds: u32) -> BigUint {
    loop {
        let mut candidate = random_bits(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if survives_sieve(&candidate) && is_probable_prime(&candidate, rounds) {
            return candidate;
        }
    }
}

/// Finds a Sophie-Germain prime `q` of `bits` bits whose companion
/// `p = 2q + 1` is also prime. Returns `(q, p)`.
///
/// Safe primes are thin on the ground (density ~ 1/ln²), so both candidates
/// are sieved before any Miller-Rabin round runs.
pub fn generate_safe_prime(bits: u64, rounds: u32) -> (BigUint, BigUint) {
    let one = BigUint::one();
    loop {
        let mut q = random_bits(bits);
        q.set_bit(bits - 1, true);
        q.set_bit(0, true);
        let p = (&q << 1usize) + &one;

        if !survives_sieve(&q) || !survives_sieve(&p) {
            continue;
        }
        if is_probable_prime(&q, rounds) && is_probable_prime(&p, rounds) {
            return (q, p);
        }
    }
}

/// Cheap trial division against the small-prime table. Candidates here are
/// always larger than every table entry.
fn survives_sieve(candidate: &BigUint) -> bool {
    SMALL_PRIMES
        .iter()
        .all(|&p| !(candidate % BigUint::from(p)).is_zero())
}

/// Selects a generator of the order-`q` subgroup of `Z_p^*` for a safe
/// prime `p = 2q + 1`.
///
/// Squaring a random element lands in the subgroup of quadratic residues,
/// which has prime order `q`; any element of it other than 1 generates it.
/// The credential equations reduce their exponents mod `q`, so the
/// generator must not have order `2q` — a full-order element makes honest
/// verification fail whenever the reduced exponent difference is an odd
/// multiple of `q`.
pub fn find_generator(p: &BigUint, q: &BigUint) -> Result<BigUint> {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    for _ in 0..MAX_SAMPLING_ATTEMPTS {
        let h = OsRng.gen_biguint_range(&two, p);
        let g = h.modpow(&two, p);
        if g != one {
            debug_assert!(g.modpow(q, p).is_one());
            return Ok(g);
        }
    }
    Err(CashError::RngFailure(format!(
        "no generator found in {MAX_SAMPLING_ATTEMPTS} attempts"
    )))
}

// ---------------------------------------------------------------------------
// Modular Arithmetic
// ---------------------------------------------------------------------------

/// Modular inverse of `a` modulo `m` via the extended Euclidean algorithm.
/// Returns `None` when `gcd(a, m) ≠ 1`.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let m = BigInt::from(m.clone());
    let ext = a.extended_gcd(&m);
    if !ext.gcd.is_one() {
        return None;
    }
    let inv = ((ext.x % &m) + &m) % &m;
    inv.to_biguint()
}

/// `(a - b) mod m`, well-defined even when `b > a`.
pub fn sub_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    let a = a % m;
    let b = b % m;
    if a >= b {
        (a - b) % m
    } else {
        (m + a - b) % m
    }
}

/// Bitwise concatenation treated as an integer: `(a << bitlen(b)) + b`.
///
/// The shift uses the exact bit length of `b`, not a padded size — the
/// credential blinding `s = (m ‖ k) mod p` and the Elgamal key derivation
/// `w = (R ‖ e) mod p` are only sound with the exact length.
pub fn concat_bits(a: &BigUint, b: &BigUint) -> BigUint {
    (a << b.bits() as usize) + b
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Renders at most `digits` leading decimal digits of a big integer, for
/// human-facing inspection output.
pub fn abbrev(n: &BigUint, digits: usize) -> String {
    let s = n.to_string();
    if s.len() > digits {
        format!("{}...", &s[..digits])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_primes_are_recognized() {
        for p in [2u32, 3, 5, 7, 97, 251] {
            assert!(is_probable_prime(&BigUint::from(p), 10), "{p}");
        }
        for c in [1u32, 4, 9, 15, 100, 255] {
            assert!(!is_probable_prime(&BigUint::from(c), 10), "{c}");
        }
    }

    #[test]
    fn known_large_prime_passes() {
        // 2^127 - 1, the Mersenne prime M127.
        let m127 = (BigUint::one() << 127usize) - BigUint::one();
        assert!(is_probable_prime(&m127, 20));
        // Its predecessor is even, its successor is a power of two.
        assert!(!is_probable_prime(&(&m127 - BigUint::one()), 20));
    }

    #[test]
    fn random_prime_has_requested_bits() {
        let p = random_prime(96, 10);
        assert_eq!(p.bits(), 96);
        assert!(is_probable_prime(&p, 20));
    }

    #[test]
    fn safe_prime_pair_holds_invariant() {
        let (q, p) = generate_safe_prime(96, 10);
        assert_eq!(p, (&q << 1usize) + BigUint::one());
        assert!(is_probable_prime(&q, 20));
        assert!(is_probable_prime(&p, 20));
    }

    #[test]
    fn generator_has_order_q() {
        let (q, p) = generate_safe_prime(96, 10);
        let g = find_generator(&p, &q).unwrap();
        let one = BigUint::one();
        assert_ne!(g, one);
        assert!(g.modpow(&q, &p).is_one());
    }

    #[test]
    fn mod_inverse_round_trips() {
        let m = BigUint::from(1_000_003u64); // prime modulus
        let a = BigUint::from(123_456u64);
        let inv = mod_inverse(&a, &m).unwrap();
        assert_eq!((a * inv) % m, BigUint::one());
    }

    #[test]
    fn mod_inverse_rejects_common_factor() {
        let m = BigUint::from(24u32);
        let a = BigUint::from(6u32);
        assert!(mod_inverse(&a, &m).is_none());
    }

    #[test]
    fn invertible_below_returns_inverse_pair() {
        let m = BigUint::from(1_000_003u64);
        let (x, x_inv) = invertible_below(&m).unwrap();
        assert_eq!((x * x_inv) % m, BigUint::one());
    }

    #[test]
    fn sub_mod_handles_underflow() {
        let m = BigUint::from(17u32);
        let a = BigUint::from(3u32);
        let b = BigUint::from(11u32);
        // 3 - 11 = -8 ≡ 9 (mod 17)
        assert_eq!(sub_mod(&a, &b, &m), BigUint::from(9u32));
        assert_eq!(sub_mod(&b, &a, &m), BigUint::from(8u32));
    }

    #[test]
    fn concat_uses_exact_bit_length() {
        // a = 0b101, b = 0b11 -> 0b10111
        let a = BigUint::from(0b101u32);
        let b = BigUint::from(0b11u32);
        assert_eq!(concat_bits(&a, &b), BigUint::from(0b10111u32));
        // Concatenating zero is the identity (bitlen(0) = 0).
        assert_eq!(concat_bits(&a, &BigUint::zero()), a);
    }

    #[test]
    fn abbrev_truncates_long_values() {
        let n = BigUint::from(123_456_789u64);
        assert_eq!(abbrev(&n, 4), "1234...");
        assert_eq!(abbrev(&n, 20), "123456789");
    }
}
