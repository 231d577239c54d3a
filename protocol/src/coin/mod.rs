//! # Coins
//!
//! A coin is born blinded, finished with the Bank's response, spent with an
//! Elgamal signature, and finally redeemed. The full lifecycle:
//!
//! ```text
//! REQUESTED --(Bank issues)--> FINISHED --(Payment)--> SPENT --(Deposit)--> DEPOSITED
//!                                   \--(Exchange)--> EXCHANGED
//! ```
//!
//! The spender keeps the whole [`Coin`]; everyone else only ever sees its
//! [`CoinProfile`] — the publicly disclosable subset whose truncated digest
//! keys the Bank's double-spend table.
//!
//! ## Verification
//!
//! Two properties tie a profile to the issuing Bank:
//!
//! 1. `A · H(t) ≡ A2^e (mod n)` — the unblinded RSA signature covers the
//!    blinded credential and the expiration date.
//! 2. `g^R ≡ A · z^{H(u ‖ α ‖ A)} (mod p)` — the response `R` proves the
//!    Bank's discrete-log secret signed the coin's challenge.
//!
//! Payment closes the coin with the Elgamal identity
//! `α^u · u^γ ≡ g^d (mod p)`, where `d` is the merchant's challenge. The
//! Elgamal private key is derived from the spender's contract, which is
//! what makes a double-spender identifiable to the Bank.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::bigmath::{
    abbrev, concat_bits, invertible_below, random_below, sub_mod,
};
use crate::crypto::hash::{digest128, sha256_bytes_uint, timestamp_bytes};
use crate::crypto::SchemeParams;
use crate::error::{CashError, Result};
use crate::identity::bank::BankProfile;
use crate::identity::client::{Client, ClientProfile};

// ---------------------------------------------------------------------------
// Coin Components
// ---------------------------------------------------------------------------

/// Per-coin randomness drawn at request time. Never leaves the spender.
///
/// Invariants: `l·l⁻¹ ≡ 1 (mod n)`, `β1·β1⁻¹ ≡ 1 (mod q)`,
/// `y·y⁻¹ ≡ 1 (mod p-1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRandom {
    /// Salt folded into the Elgamal key derivation.
    pub e: BigUint,
    /// RSA blinding factor.
    pub l: BigUint,
    pub l_inv: BigUint,
    /// Credential blinding exponent.
    pub beta1: BigUint,
    pub beta1_inv: BigUint,
    /// Additive blinding exponent.
    pub beta2: BigUint,
    /// Elgamal ephemeral exponent.
    pub y: BigUint,
    pub y_inv: BigUint,
}

/// The coin's Elgamal keypair and, after payment, its signature chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinElgamal {
    /// Private key `w = (R ‖ e) mod p`, derived from the contract.
    pub private: BigUint,
    /// Public key `α = g^w mod p`.
    pub public: BigUint,
    /// First component `u = g^y mod p`.
    pub first: BigUint,
    /// Second component `γ`; zero until payment.
    pub second: BigUint,
    /// Merchant challenge `d`; zero until payment.
    pub msg: BigUint,
}

/// Blind-signature parameters. The client sets the first three at request
/// time, the Bank's response fills the middle, and the client computes the
/// last two when finishing the coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinParams {
    /// Blinded credential `A = v^{β1} · g^{β2} mod p`.
    pub blinded: BigUint,
    /// RSA blind-signature envelope `a = A · l^e mod n`.
    pub envelope: BigUint,
    /// Challenge `C = β1⁻¹ · H(u ‖ α ‖ A) mod q`.
    pub challenge: BigUint,
    /// Coin expiration chosen by the Bank.
    pub expiration: DateTime<Utc>,
    /// Bank's blind RSA signature `A1 = (a · H(t))^d mod n`.
    pub envelope_sig: BigUint,
    /// Bank's challenge signature `C1 = C·x + s mod q`.
    pub challenge_sig: BigUint,
    /// Unblinded RSA signature `A2 = l⁻¹ · A1 mod n`.
    pub signature: BigUint,
    /// Unblinded response `R = β1·C1 + β2 mod q`.
    pub response: BigUint,
}

/// A complete coin as held in a spender's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub random: CoinRandom,
    pub elgamal: CoinElgamal,
    pub params: CoinParams,
}

/// The publicly disclosable subset of a coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinProfile {
    /// Elgamal public key `α`.
    pub public: BigUint,
    /// Elgamal first component `u`.
    pub first: BigUint,
    /// Blinded credential `A`.
    pub blinded: BigUint,
    /// Response `R`.
    pub response: BigUint,
    /// RSA signature `A2`.
    pub signature: BigUint,
    /// Expiration date.
    pub expiration: DateTime<Utc>,
    /// Elgamal second component `γ` (zero until payment).
    pub second: BigUint,
    /// Merchant challenge `d` (zero until payment).
    pub msg: BigUint,
}

// ---------------------------------------------------------------------------
// Wire Messages
// ---------------------------------------------------------------------------

/// A withdrawal (or exchange) request: the blinded parts the Bank signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRequest {
    /// Envelope `a`.
    pub envelope: BigUint,
    /// Challenge `C`.
    pub challenge: BigUint,
}

/// The Bank's response to a coin request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinIssue {
    /// Expiration date folded into the RSA signature.
    pub expiration: DateTime<Utc>,
    /// Blind RSA signature `A1`.
    pub envelope_sig: BigUint,
    /// Challenge signature `C1`.
    pub challenge_sig: BigUint,
}

// ---------------------------------------------------------------------------
// Construction & Lifecycle
// ---------------------------------------------------------------------------

impl Coin {
    /// Builds a fresh partial coin for a withdrawal request.
    ///
    /// Requires the client's credential/contract pair. All blinding values
    /// that need inverses are re-sampled until coprime, with a bounded
    /// attempt budget.
    pub fn request(client: &Client) -> Result<Coin> {
        let (credential, contract) = client.credentials()?;
        let scheme = &client.bank.scheme;
        let p = &scheme.p;
        let q = &scheme.q;
        let n = &client.bank.n;

        let e = random_below(p);
        let (l, l_inv) = invertible_below(n)?;
        let (beta1, beta1_inv) = invertible_below(q)?;
        let p_minus_1 = p - 1u32;
        let (y, y_inv) = invertible_below(&p_minus_1)?;
        let beta2 = random_below(p);

        // Elgamal keypair, tied to the contract through the key derivation.
        let private = concat_bits(contract, &e) % p;
        let public = scheme.g.modpow(&private, p);
        let first = scheme.g.modpow(&y, p);

        // Blinded credential and its RSA envelope.
        let blinded =
            (credential.modpow(&beta1, p) * scheme.g.modpow(&beta2, p)) % p;
        let envelope = (&blinded * l.modpow(&client.bank.e, n)) % n;

        let coin_digest = sha256_bytes_uint(&[
            &first.to_bytes_be(),
            &public.to_bytes_be(),
            &blinded.to_bytes_be(),
        ]);
        let challenge = (&beta1_inv * coin_digest) % q;

        Ok(Coin {
            random: CoinRandom {
                e,
                l,
                l_inv,
                beta1,
                beta1_inv,
                beta2,
                y,
                y_inv,
            },
            elgamal: CoinElgamal {
                private,
                public,
                first,
                second: BigUint::zero(),
                msg: BigUint::zero(),
            },
            params: CoinParams {
                blinded,
                envelope,
                challenge,
                expiration: DateTime::UNIX_EPOCH,
                envelope_sig: BigUint::zero(),
                challenge_sig: BigUint::zero(),
                signature: BigUint::zero(),
                response: BigUint::zero(),
            },
        })
    }

    /// The blinded request message sent to the Bank.
    pub fn request_message(&self) -> CoinRequest {
        CoinRequest {
            envelope: self.params.envelope.clone(),
            challenge: self.params.challenge.clone(),
        }
    }

    /// Completes the coin from the Bank's response: strips the RSA blinding
    /// (`A2 = l⁻¹·A1`) and unblinds the challenge signature
    /// (`R = β1·C1 + β2`).
    pub fn finish(&mut self, bank: &BankProfile, issue: CoinIssue) {
        self.params.signature = (&self.random.l_inv * &issue.envelope_sig) % &bank.n;
        self.params.response = (&self.random.beta1 * &issue.challenge_sig
            + &self.random.beta2)
            % &bank.scheme.q;
        self.params.envelope_sig = issue.envelope_sig;
        self.params.challenge_sig = issue.challenge_sig;
        self.params.expiration = issue.expiration;
    }

    /// Signs the merchant's challenge, closing the coin for payment:
    /// `γ = (d − w·u) · y⁻¹ mod (p−1)`.
    pub fn sign(&mut self, scheme: &SchemeParams, msg: &BigUint) -> BigUint {
        self.elgamal.msg = msg.clone();
        let modulus = &scheme.p - 1u32;
        let committed = (&self.elgamal.private * &self.elgamal.first) % &modulus;
        let second =
            (sub_mod(msg, &committed, &modulus) * &self.random.y_inv) % &modulus;
        self.elgamal.second = second.clone();
        second
    }

    /// The publicly disclosable projection of this coin.
    pub fn profile(&self) -> CoinProfile {
        CoinProfile {
            public: self.elgamal.public.clone(),
            first: self.elgamal.first.clone(),
            blinded: self.params.blinded.clone(),
            response: self.params.response.clone(),
            signature: self.params.signature.clone(),
            expiration: self.params.expiration,
            second: self.elgamal.second.clone(),
            msg: self.elgamal.msg.clone(),
        }
    }

    /// Reconstructs a wallet coin from a profile received in payment.
    /// The blinding randomness and Elgamal private key belong to the
    /// spender and are zeroed — the merchant can deposit this coin but
    /// never re-spend it.
    pub fn from_profile(profile: &CoinProfile) -> Coin {
        Coin {
            random: CoinRandom {
                e: BigUint::zero(),
                l: BigUint::zero(),
                l_inv: BigUint::zero(),
                beta1: BigUint::zero(),
                beta1_inv: BigUint::zero(),
                beta2: BigUint::zero(),
                y: BigUint::zero(),
                y_inv: BigUint::zero(),
            },
            elgamal: CoinElgamal {
                private: BigUint::zero(),
                public: profile.public.clone(),
                first: profile.first.clone(),
                second: profile.second.clone(),
                msg: profile.msg.clone(),
            },
            params: CoinParams {
                blinded: profile.blinded.clone(),
                envelope: BigUint::zero(),
                challenge: BigUint::zero(),
                expiration: profile.expiration,
                envelope_sig: BigUint::zero(),
                challenge_sig: BigUint::zero(),
                signature: profile.signature.clone(),
                response: profile.response.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

impl CoinProfile {
    /// Verifies the two blind-signature properties against the issuing
    /// Bank's profile. Expiration is not an input here — callers on the
    /// payment and deposit paths check it separately.
    pub fn verify_properties(&self, bank: &BankProfile) -> Result<()> {
        // Property 1: the RSA signature covers A and the expiration digest.
        let expiration_digest =
            sha256_bytes_uint(&[&timestamp_bytes(&self.expiration)]);
        let left = (&self.blinded * &expiration_digest) % &bank.n;
        let right = self.signature.modpow(&bank.e, &bank.n);
        if left != right {
            return Err(CashError::InvalidCoin(
                "rsa signature does not cover coin".into(),
            ));
        }

        // Property 2: the response opens the Bank's challenge signature.
        let p = &bank.scheme.p;
        let left = bank.scheme.g.modpow(&self.response, p);
        let coin_digest = sha256_bytes_uint(&[
            &self.first.to_bytes_be(),
            &self.public.to_bytes_be(),
            &self.blinded.to_bytes_be(),
        ]);
        let right = (&self.blinded * bank.public.modpow(&coin_digest, p)) % p;
        if left != right {
            return Err(CashError::InvalidCoin(
                "credential signature does not verify".into(),
            ));
        }
        Ok(())
    }

    /// Merchant challenge: stamps the coin with
    /// `d = H(α ‖ u ‖ tradeId ‖ t)` where `t` is the current time. The
    /// trade identifier makes challenges merchant-specific, so a replayed
    /// payment session produces a different `d`.
    pub fn stamp(&mut self, merchant: &ClientProfile) -> BigUint {
        let now = Utc::now();
        let msg = sha256_bytes_uint(&[
            &self.public.to_bytes_be(),
            &self.first.to_bytes_be(),
            &merchant.trade_id.to_bytes_be(),
            &timestamp_bytes(&now),
        ]);
        self.msg = msg.clone();
        msg
    }

    /// Records the spender's second component and checks the Elgamal
    /// identity `α^u · u^γ ≡ g^d (mod p)`.
    pub fn accept_signature(
        &mut self,
        bank: &BankProfile,
        second: &BigUint,
    ) -> Result<()> {
        self.second = second.clone();
        self.verify_elgamal(&bank.scheme)
    }

    /// Checks the Elgamal identity over the stored `(second, msg)` pair.
    pub fn verify_elgamal(&self, scheme: &SchemeParams) -> Result<()> {
        let p = &scheme.p;
        let left = (self.public.modpow(&self.first, p)
            * self.first.modpow(&self.second, p))
            % p;
        let right = scheme.g.modpow(&self.msg, p);
        if left != right {
            return Err(CashError::InvalidElgamal);
        }
        Ok(())
    }

    /// True once payment has populated both halves of the signature chain.
    /// A coin deposited without this is a double-deposit-or-forgery signal.
    pub fn is_payment_closed(&self) -> bool {
        !self.second.is_zero() && !self.msg.is_zero()
    }

    /// True when the coin's expiration date has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now
    }

    /// Truncated digest over the public fields set at issuance — the
    /// double-spend table key. `second` and `msg` are deliberately
    /// excluded so the digest is stable across payment.
    pub fn digest(&self) -> u128 {
        digest128(&[
            &self.public.to_bytes_be(),
            &self.first.to_bytes_be(),
            &self.blinded.to_bytes_be(),
            &self.response.to_bytes_be(),
            &self.signature.to_bytes_be(),
            &timestamp_bytes(&self.expiration),
        ])
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.profile())
    }
}

impl fmt::Display for CoinProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CoinProfile {{")?;
        writeln!(f, "# Pub:        {}", abbrev(&self.public, 100))?;
        writeln!(f, "# First:      {}", abbrev(&self.first, 100))?;
        writeln!(f, "# A:          {}", abbrev(&self.blinded, 100))?;
        writeln!(f, "# R:          {}", abbrev(&self.response, 100))?;
        writeln!(f, "# A2:         {}", abbrev(&self.signature, 100))?;
        writeln!(f, "# Expiration: {}", self.expiration)?;
        writeln!(f, "# Second:     {}", abbrev(&self.second, 100))?;
        writeln!(f, "# Msg:        {}", abbrev(&self.msg, 100))?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaKey;
    use crate::identity::bank::Bank;

    /// A small but structurally faithful world: bank, enrolled client,
    /// and one finished coin.
    fn issued_coin() -> (Bank, Client, Coin) {
        let scheme = SchemeParams::generate(96).unwrap();
        let bank = Bank::with_key(scheme, RsaKey::generate(512).unwrap());
        let mut client =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        let info = bank.register_client(&client.profile()).unwrap();
        client.set_credentials(info.credential.clone(), info.contract.clone());

        let mut coin = client.request_coin().unwrap();
        let issue = bank.issue_coin(&info, &coin.request_message());
        coin.finish(&client.bank, issue);
        (bank, client, coin)
    }

    #[test]
    fn honest_coin_verifies_properties() {
        let (bank, _, coin) = issued_coin();
        coin.profile().verify_properties(&bank.profile()).unwrap();
    }

    #[test]
    fn tampered_signature_fails_first_property() {
        let (bank, _, coin) = issued_coin();
        let mut profile = coin.profile();
        profile.signature += BigUint::from(1u32);
        assert!(matches!(
            profile.verify_properties(&bank.profile()),
            Err(CashError::InvalidCoin(_))
        ));
    }

    #[test]
    fn tampered_response_fails_second_property() {
        let (bank, _, coin) = issued_coin();
        let mut profile = coin.profile();
        profile.response += BigUint::from(1u32);
        assert!(profile.verify_properties(&bank.profile()).is_err());
    }

    #[test]
    fn stretched_expiration_fails_verification() {
        let (bank, _, coin) = issued_coin();
        let mut profile = coin.profile();
        profile.expiration += chrono::Duration::days(365);
        assert!(profile.verify_properties(&bank.profile()).is_err());
    }

    #[test]
    fn payment_round_trip_verifies_elgamal() {
        let (bank, client, mut coin) = issued_coin();
        let merchant =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());

        let mut profile = coin.profile();
        assert!(!profile.is_payment_closed());

        let msg = profile.stamp(&merchant.profile());
        let second = coin.sign(&client.bank.scheme, &msg);
        profile.accept_signature(&bank.profile(), &second).unwrap();
        assert!(profile.is_payment_closed());
    }

    #[test]
    fn wrong_second_component_rejected() {
        let (bank, client, mut coin) = issued_coin();
        let merchant =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());

        let mut profile = coin.profile();
        let msg = profile.stamp(&merchant.profile());
        let second = coin.sign(&client.bank.scheme, &msg) + BigUint::from(1u32);
        assert!(matches!(
            profile.accept_signature(&bank.profile(), &second),
            Err(CashError::InvalidElgamal)
        ));
    }

    #[test]
    fn digest_stable_across_payment() {
        let (bank, client, mut coin) = issued_coin();
        let merchant =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());

        let before = coin.profile().digest();
        let mut profile = coin.profile();
        let msg = profile.stamp(&merchant.profile());
        let second = coin.sign(&client.bank.scheme, &msg);
        profile.accept_signature(&bank.profile(), &second).unwrap();
        assert_eq!(profile.digest(), before);
    }

    #[test]
    fn received_coin_preserves_digest_and_chain() {
        let (bank, client, mut coin) = issued_coin();
        let merchant =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());

        let mut profile = coin.profile();
        let msg = profile.stamp(&merchant.profile());
        let second = coin.sign(&client.bank.scheme, &msg);
        profile.accept_signature(&bank.profile(), &second).unwrap();

        let received = Coin::from_profile(&profile);
        assert_eq!(received.profile().digest(), profile.digest());
        received.profile().verify_elgamal(&bank.scheme).unwrap();
        assert!(received.random.l.is_zero());
        assert!(received.elgamal.private.is_zero());
    }

    #[test]
    fn expiry_boundary() {
        let (_, _, coin) = issued_coin();
        let profile = coin.profile();
        assert!(!profile.is_expired(Utc::now()));
        assert!(profile.is_expired(profile.expiration + chrono::Duration::seconds(1)));
    }

    #[test]
    fn serde_round_trip_preserves_coin() {
        let (_, _, coin) = issued_coin();
        let bytes = bincode::serialize(&coin).unwrap();
        let back: Coin = bincode::deserialize(&bytes).unwrap();
        assert_eq!(coin, back);
    }
}
