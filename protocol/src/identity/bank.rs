//! # Bank Identity
//!
//! The Bank owns the scheme's signing trapdoors: the discrete-log secret
//! `x` behind its public number `z = g^x`, and the RSA private exponent
//! used for blind coin signatures. Both stages of Bank-side issuance math
//! live here: account registration (credential/contract) and the
//! withdrawal response (blind signature on a coin request).

use chrono::{Days, Months, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coin::{CoinIssue, CoinRequest};
use crate::config::{
    COIN_VALIDITY_EXTRA_DAYS, COIN_VALIDITY_MONTHS, INITIAL_ACCOUNT_BALANCE,
    RSA_KEY_BITS,
};
use crate::crypto::bigmath::{abbrev, concat_bits, random_below};
use crate::crypto::hash::{sha256_bytes_uint, timestamp_bytes};
use crate::crypto::{RsaKey, SchemeParams};
use crate::error::Result;
use crate::identity::client::{ClientInfo, ClientProfile};

/// A Bank's long-term identity. Created once, persisted, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    /// The public group.
    pub scheme: SchemeParams,
    /// RSA key for blind coin signatures.
    pub key: RsaKey,
    /// Private identity number `x ∈ [0, p)`.
    pub private: BigUint,
    /// Public identity number `z = g^x mod p`.
    pub public: BigUint,
}

/// The Bank's public projection: everything a client needs to verify coins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankProfile {
    /// The public group.
    pub scheme: SchemeParams,
    /// Public identity number `z`.
    pub public: BigUint,
    /// RSA modulus.
    pub n: BigUint,
    /// RSA public exponent.
    pub e: BigUint,
}

impl Bank {
    /// Creates a Bank identity with a freshly generated RSA key.
    pub fn new(scheme: SchemeParams) -> Result<Self> {
        let key = RsaKey::generate(RSA_KEY_BITS)?;
        Ok(Self::with_key(scheme, key))
    }

    /// Creates a Bank identity around an existing RSA key.
    pub fn with_key(scheme: SchemeParams, key: RsaKey) -> Self {
        let private = random_below(&scheme.p);
        let public = scheme.g.modpow(&private, &scheme.p);
        Bank {
            scheme,
            key,
            private,
            public,
        }
    }

    /// The public projection of this Bank.
    pub fn profile(&self) -> BankProfile {
        BankProfile {
            scheme: self.scheme.clone(),
            public: self.public.clone(),
            n: self.key.n.clone(),
            e: self.key.e.clone(),
        }
    }

    /// Account generation: verifies a client's identity hash and issues its
    /// credential/contract pair.
    ///
    /// The client's public number is blinded with a fresh randomizer `k`
    /// (`s = (m ‖ k) mod p`), so the credential `v = g^s` commits to the
    /// client identity without revealing it. The contract `R = v^x` is the
    /// Bank's discrete-log signature over that credential.
    pub fn register_client(&self, profile: &ClientProfile) -> Result<ClientInfo> {
        profile.verify_identity()?;

        let k = random_below(&self.scheme.p);
        let s = concat_bits(&profile.public, &k) % &self.scheme.p;
        let credential = self.scheme.g.modpow(&s, &self.scheme.p);
        let contract = credential.modpow(&self.private, &self.scheme.p);

        Ok(ClientInfo {
            profile: profile.clone(),
            k,
            s,
            credential,
            contract,
            balance: INITIAL_ACCOUNT_BALANCE,
        })
    }

    /// Withdrawal response: blind-signs a coin request.
    ///
    /// The expiration date is folded into the RSA signature
    /// (`A1 = (a · H(t))^d mod n`) so a spender cannot stretch a coin's
    /// lifetime, and the challenge is signed with the Bank's discrete-log
    /// secret (`C1 = C·x + s mod q`) binding the coin to this client's
    /// blinded identity.
    pub fn issue_coin(&self, client: &ClientInfo, request: &CoinRequest) -> CoinIssue {
        let expiration = Utc::now()
            + Months::new(COIN_VALIDITY_MONTHS)
            + Days::new(COIN_VALIDITY_EXTRA_DAYS);
        let expiration_digest = sha256_bytes_uint(&[&timestamp_bytes(&expiration)]);

        let envelope_sig = (&request.envelope * &expiration_digest)
            .modpow(&self.key.d, &self.key.n);
        let challenge_sig =
            (&request.challenge * &self.private + &client.s) % &self.scheme.q;

        CoinIssue {
            expiration,
            envelope_sig,
            challenge_sig,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bank {{")?;
        writeln!(f, "{}", self.scheme)?;
        writeln!(f, "{}", self.key)?;
        writeln!(f, "# Priv: {}", abbrev(&self.private, 100))?;
        writeln!(f, "# Pub:  {}", abbrev(&self.public, 100))?;
        write!(f, "}}")
    }
}

impl fmt::Display for BankProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BankProfile {{")?;
        writeln!(f, "{}", self.scheme)?;
        writeln!(f, "# Pub: {}", abbrev(&self.public, 100))?;
        writeln!(f, "# N:   {}", abbrev(&self.n, 100))?;
        writeln!(f, "# E:   {}", abbrev(&self.e, 100))?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::client::Client;

    fn small_bank() -> Bank {
        let scheme = SchemeParams::generate(96).unwrap();
        let key = RsaKey::generate(512).unwrap();
        Bank::with_key(scheme, key)
    }

    #[test]
    fn public_number_is_commitment_to_private() {
        let bank = small_bank();
        assert_eq!(
            bank.public,
            bank.scheme.g.modpow(&bank.private, &bank.scheme.p)
        );
    }

    #[test]
    fn profile_carries_only_public_fields() {
        let bank = small_bank();
        let profile = bank.profile();
        assert_eq!(profile.public, bank.public);
        assert_eq!(profile.n, bank.key.n);
        assert_eq!(profile.e, bank.key.e);
    }

    #[test]
    fn register_client_signs_credential_with_contract() {
        let bank = small_bank();
        let client_key = RsaKey::generate(512).unwrap();
        let client = Client::with_key(bank.profile(), client_key);
        let info = bank.register_client(&client.profile()).unwrap();

        // v = g^s and R = v^x must hold.
        assert_eq!(
            info.credential,
            bank.scheme.g.modpow(&info.s, &bank.scheme.p)
        );
        assert_eq!(
            info.contract,
            info.credential.modpow(&bank.private, &bank.scheme.p)
        );
        assert_eq!(info.balance, INITIAL_ACCOUNT_BALANCE);
    }

    #[test]
    fn register_client_rejects_tampered_identity_hash() {
        let bank = small_bank();
        let client_key = RsaKey::generate(512).unwrap();
        let client = Client::with_key(bank.profile(), client_key);
        let mut profile = client.profile();
        profile.identity_hash += BigUint::from(1u32);
        assert!(matches!(
            bank.register_client(&profile),
            Err(crate::error::CashError::IdentityMismatch)
        ));
    }

    #[test]
    fn coin_expiration_is_about_a_month_out() {
        let bank = small_bank();
        let client_key = RsaKey::generate(512).unwrap();
        let mut client = Client::with_key(bank.profile(), client_key);
        let info = bank.register_client(&client.profile()).unwrap();
        client.set_credentials(info.credential.clone(), info.contract.clone());

        let coin = client.request_coin().unwrap();
        let issue = bank.issue_coin(&info, &coin.request_message());
        let horizon = issue.expiration - Utc::now();
        assert!(horizon > chrono::Duration::days(27));
        assert!(horizon < chrono::Duration::days(33));
    }
}
