//! # Scheme Parameters
//!
//! The public group everything else lives in: a Sophie-Germain prime `q`,
//! its safe prime `p = 2q + 1`, and a generator `g` of `Z_p^*`.
//!
//! Production deployments never generate these at runtime — the canonical
//! parameters ship as an embedded JSON artifact and are validated once on
//! first access. [`SchemeParams::generate`] exists for parameter ceremonies
//! and for tests that want a small group.

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::config::MILLER_RABIN_ROUNDS;
use crate::crypto::bigmath::{
    abbrev, find_generator, generate_safe_prime, is_probable_prime,
};
use crate::error::{CashError, Result};

/// The embedded production parameters (1024-bit `q`).
const EMBEDDED_ARTIFACT: &str = include_str!("../scheme_params.json");

/// The public discrete-log group of the scheme. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeParams {
    /// Sophie-Germain prime.
    pub q: BigUint,
    /// Safe prime `p = 2q + 1`.
    pub p: BigUint,
    /// Generator of `Z_p^*`.
    pub g: BigUint,
}

/// On-disk shape of the artifact: decimal strings, human-auditable.
#[derive(Serialize, Deserialize)]
struct Artifact {
    q: String,
    p: String,
    g: String,
}

impl SchemeParams {
    /// Generates fresh parameters with a `bits`-bit Sophie-Germain prime.
    ///
    /// The generator is selected with an explicit subgroup test: `g` is a
    /// quadratic residue other than 1, so it generates the prime-order-`q`
    /// subgroup the credential arithmetic requires.
    pub fn generate(bits: u64) -> Result<Self> {
        let (q, p) = generate_safe_prime(bits, MILLER_RABIN_ROUNDS);
        let g = find_generator(&p, &q)?;
        Ok(SchemeParams { q, p, g })
    }

    /// The embedded production parameters, validated on first access.
    ///
    /// Failure to parse or validate the artifact is unrecoverable and
    /// aborts the process, like any other broken-binary condition.
    pub fn embedded() -> &'static SchemeParams {
        static EMBEDDED: OnceLock<SchemeParams> = OnceLock::new();
        EMBEDDED.get_or_init(|| {
            let artifact: Artifact = serde_json::from_str(EMBEDDED_ARTIFACT)
                .expect("embedded scheme artifact is not valid JSON");
            let scheme = SchemeParams {
                q: artifact.q.parse().expect("artifact field q"),
                p: artifact.p.parse().expect("artifact field p"),
                g: artifact.g.parse().expect("artifact field g"),
            };
            scheme
                .validate()
                .expect("embedded scheme artifact fails validation");
            scheme
        })
    }

    /// Checks the group invariant: `p = 2q + 1`, both probable primes,
    /// `g ∈ [2, p)`, and `g` a member of the order-`q` subgroup.
    pub fn validate(&self) -> Result<()> {
        if self.p != (&self.q << 1usize) + BigUint::one() {
            return Err(CashError::InvalidScheme("p != 2q + 1".into()));
        }
        if !is_probable_prime(&self.q, MILLER_RABIN_ROUNDS) {
            return Err(CashError::InvalidScheme("q is composite".into()));
        }
        if !is_probable_prime(&self.p, MILLER_RABIN_ROUNDS) {
            return Err(CashError::InvalidScheme("p is composite".into()));
        }
        if self.g < BigUint::from(2u32) || self.g >= self.p {
            return Err(CashError::InvalidScheme("g out of range".into()));
        }
        if !self.g.modpow(&self.q, &self.p).is_one() {
            return Err(CashError::InvalidScheme(
                "g is not in the order-q subgroup".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SchemeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SchemeParams {{")?;
        writeln!(f, "# Q: {}", abbrev(&self.q, 100))?;
        writeln!(f, "# P: {}", abbrev(&self.p, 100))?;
        writeln!(f, "# G: {}", abbrev(&self.g, 100))?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_params_validate() {
        let scheme = SchemeParams::generate(96).unwrap();
        scheme.validate().unwrap();
    }

    #[test]
    fn tampered_params_fail_validation() {
        let mut scheme = SchemeParams::generate(96).unwrap();
        scheme.p += BigUint::from(2u32);
        assert!(matches!(
            scheme.validate(),
            Err(CashError::InvalidScheme(_))
        ));
    }

    #[test]
    fn out_of_range_generator_rejected() {
        let mut scheme = SchemeParams::generate(96).unwrap();
        scheme.g = scheme.p.clone();
        assert!(scheme.validate().is_err());
        scheme.g = BigUint::one();
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn embedded_artifact_loads_and_validates() {
        let scheme = SchemeParams::embedded();
        assert_eq!(scheme.q.bits(), 1024);
        assert_eq!(scheme.p.bits(), 1025);
    }

    #[test]
    fn serde_round_trip() {
        let scheme = SchemeParams::generate(96).unwrap();
        let bytes = bincode::serialize(&scheme).unwrap();
        let back: SchemeParams = bincode::deserialize(&bytes).unwrap();
        assert_eq!(scheme, back);
    }

    // Full-size generation takes a while even optimized; run explicitly with
    // `cargo test -- --ignored` when touching the prime search.
    #[test]
    #[ignore]
    fn full_size_generation() {
        let scheme = SchemeParams::generate(1024).unwrap();
        scheme.validate().unwrap();
        assert_eq!(scheme.q.bits(), 1024);
    }
}
