//! # Client Identity
//!
//! A client is bound to one Bank: it carries that Bank's profile, its own
//! RSA key, three identity numbers (`r_m`, `m`, and the trade identifier
//! mixed into payment challenges), and — once account generation has run —
//! the credential/contract pair `(v, R)` that seeds every coin.

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coin::Coin;
use crate::config::RSA_KEY_BITS;
use crate::crypto::bigmath::{abbrev, random_below};
use crate::crypto::hash::{digest128, sha256_bytes_uint};
use crate::crypto::RsaKey;
use crate::error::{CashError, Result};
use crate::identity::bank::BankProfile;

/// A client's long-term identity and Bank binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// The Bank this client is enrolled with.
    pub bank: BankProfile,
    /// The client's own RSA key.
    pub key: RsaKey,
    /// Trade identifier `∈ [0, n-1)`, mixed into merchant challenges so
    /// distinct merchants stamp distinct messages.
    pub trade_id: BigUint,
    /// Private identity number `r_m ∈ [0, p)`.
    pub private: BigUint,
    /// Public identity number `m ∈ [0, n)`.
    pub public: BigUint,
    /// Bank-issued credential `v`; populated by account generation.
    pub credential: Option<BigUint>,
    /// Bank-issued contract `R = v^x`; populated by account generation.
    pub contract: Option<BigUint>,
}

/// The public projection a client presents to the Bank and to merchants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    /// `g^{r_m} mod p` — the stamp committing to the private number.
    pub priv_stamp: BigUint,
    /// `SHA256(m ‖ priv_stamp)` binding the public fields together.
    pub identity_hash: BigUint,
    /// Trade identifier.
    pub trade_id: BigUint,
    /// Public identity number `m`.
    pub public: BigUint,
    /// Client RSA modulus.
    pub n: BigUint,
    /// Client RSA public exponent.
    pub e: BigUint,
}

/// The Bank-side record of a registered client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// The profile as presented at registration.
    pub profile: ClientProfile,
    /// Randomizer drawn at registration.
    pub k: BigUint,
    /// Blinded public identity `s = (m ‖ k) mod p`.
    pub s: BigUint,
    /// Issued credential `v = g^s`.
    pub credential: BigUint,
    /// Issued contract `R = v^x`.
    pub contract: BigUint,
    /// Account balance in coins.
    pub balance: i64,
}

impl Client {
    /// Creates a client enrolled with `bank`, generating a fresh RSA key.
    pub fn new(bank: BankProfile) -> Result<Self> {
        let key = RsaKey::generate(RSA_KEY_BITS)?;
        Ok(Self::with_key(bank, key))
    }

    /// Creates a client around an existing RSA key.
    pub fn with_key(bank: BankProfile, key: RsaKey) -> Self {
        let private = random_below(&bank.scheme.p);
        let public = random_below(&bank.n);
        let trade_id = random_below(&(&bank.n - BigUint::one()));
        Client {
            bank,
            key,
            trade_id,
            private,
            public,
            credential: None,
            contract: None,
        }
    }

    /// The public projection of this client.
    pub fn profile(&self) -> ClientProfile {
        let priv_stamp = self
            .bank
            .scheme
            .g
            .modpow(&self.private, &self.bank.scheme.p);
        let identity_hash = sha256_bytes_uint(&[
            &self.public.to_bytes_be(),
            &priv_stamp.to_bytes_be(),
        ]);
        ClientProfile {
            priv_stamp,
            identity_hash,
            trade_id: self.trade_id.clone(),
            public: self.public.clone(),
            n: self.key.n.clone(),
            e: self.key.e.clone(),
        }
    }

    /// Stores the credential/contract pair issued by account generation.
    /// Immutable thereafter.
    pub fn set_credentials(&mut self, credential: BigUint, contract: BigUint) {
        self.credential = Some(credential);
        self.contract = Some(contract);
    }

    /// The issued `(v, R)` pair, or an error before account generation.
    pub fn credentials(&self) -> Result<(&BigUint, &BigUint)> {
        match (&self.credential, &self.contract) {
            (Some(v), Some(r)) => Ok((v, r)),
            _ => Err(CashError::InvalidState(
                "client has no credentials; run account generation first".into(),
            )),
        }
    }

    /// Builds a fresh partial coin ready for a withdrawal request.
    pub fn request_coin(&self) -> Result<Coin> {
        Coin::request(self)
    }
}

impl ClientProfile {
    /// Recomputes the identity hash and requires it to match.
    pub fn verify_identity(&self) -> Result<()> {
        let expected = sha256_bytes_uint(&[
            &self.public.to_bytes_be(),
            &self.priv_stamp.to_bytes_be(),
        ]);
        if expected != self.identity_hash {
            return Err(CashError::IdentityMismatch);
        }
        Ok(())
    }

    /// Truncated digest over all public fields — the ledger key for this
    /// client.
    pub fn digest(&self) -> u128 {
        digest128(&[
            &self.priv_stamp.to_bytes_be(),
            &self.identity_hash.to_bytes_be(),
            &self.trade_id.to_bytes_be(),
            &self.public.to_bytes_be(),
            &self.n.to_bytes_be(),
            &self.e.to_bytes_be(),
        ])
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Client {{")?;
        writeln!(f, "# TradeId:    {}", abbrev(&self.trade_id, 100))?;
        writeln!(f, "# Priv:       {}", abbrev(&self.private, 100))?;
        writeln!(f, "# Pub:        {}", abbrev(&self.public, 100))?;
        match (&self.credential, &self.contract) {
            (Some(v), Some(r)) => {
                writeln!(f, "# Credential: {}", abbrev(v, 100))?;
                writeln!(f, "# Contract:   {}", abbrev(r, 100))?;
            }
            _ => writeln!(f, "# Credential: <not enrolled>")?,
        }
        write!(f, "}}")
    }
}

impl fmt::Display for ClientProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ClientProfile {{")?;
        writeln!(f, "# PrivStamp:    {}", abbrev(&self.priv_stamp, 100))?;
        writeln!(f, "# IdentityHash: {}", abbrev(&self.identity_hash, 100))?;
        writeln!(f, "# TradeId:      {}", abbrev(&self.trade_id, 100))?;
        writeln!(f, "# Pub:          {}", abbrev(&self.public, 100))?;
        write!(f, "}}")
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ClientInfo {{")?;
        writeln!(f, "{}", self.profile)?;
        writeln!(f, "# K:          {}", abbrev(&self.k, 100))?;
        writeln!(f, "# S:          {}", abbrev(&self.s, 100))?;
        writeln!(f, "# Credential: {}", abbrev(&self.credential, 100))?;
        writeln!(f, "# Contract:   {}", abbrev(&self.contract, 100))?;
        writeln!(f, "# Balance:    {}", self.balance)?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SchemeParams;
    use crate::identity::bank::Bank;

    fn small_pair() -> (Bank, Client) {
        let scheme = SchemeParams::generate(96).unwrap();
        let bank = Bank::with_key(scheme, RsaKey::generate(512).unwrap());
        let client = Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        (bank, client)
    }

    #[test]
    fn profile_identity_hash_verifies() {
        let (_, client) = small_pair();
        client.profile().verify_identity().unwrap();
    }

    #[test]
    fn tampered_profile_fails_identity_check() {
        let (_, client) = small_pair();
        let mut profile = client.profile();
        profile.public += BigUint::one();
        assert!(matches!(
            profile.verify_identity(),
            Err(CashError::IdentityMismatch)
        ));
    }

    #[test]
    fn digest_is_stable_and_discriminating() {
        let (bank, client) = small_pair();
        let profile = client.profile();
        assert_eq!(profile.digest(), profile.digest());

        let other = Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        assert_ne!(profile.digest(), other.profile().digest());
    }

    #[test]
    fn coin_request_requires_credentials() {
        let (_, client) = small_pair();
        assert!(matches!(
            client.request_coin(),
            Err(CashError::InvalidState(_))
        ));
    }

    #[test]
    fn credentials_become_available_after_enrollment() {
        let (bank, mut client) = small_pair();
        assert!(client.credentials().is_err());
        let info = bank.register_client(&client.profile()).unwrap();
        client.set_credentials(info.credential.clone(), info.contract.clone());
        let (v, r) = client.credentials().unwrap();
        assert_eq!(v, &info.credential);
        assert_eq!(r, &info.contract);
    }
}
