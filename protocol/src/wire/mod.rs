//! # Wire Protocol
//!
//! The six session state machines and their plumbing. Each stage is an
//! independent short-lived TCP session with a fixed, strictly alternating
//! message schedule — no pipelining, no reordering. Setup and Get run over
//! plain TCP (they deliver the certificates everything else is
//! authenticated with); the rest run over TLS.
//!
//! Messages are bincode-encoded records behind a 4-byte big-endian length
//! prefix ([`codec`]). A dropped connection at any point aborts the
//! session; the stores only commit at the schedule points the protocol
//! defines, so an abort never leaves partial state.

pub mod client;
pub mod codec;
pub mod server;
pub mod tls;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::config;

/// The credential/contract pair issued by account generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Credential `v = g^s mod p`.
    pub credential: BigUint,
    /// Contract `R = v^x mod p`.
    pub contract: BigUint,
}

/// The port assignments of one Bank (or merchant) deployment.
///
/// Defaults to the well-known ports; tests override with ephemeral ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub setup: u16,
    pub accgen: u16,
    pub withdrawal: u16,
    pub payment: u16,
    pub deposit: u16,
    pub exchange: u16,
    pub get: u16,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            setup: config::SETUP_PORT,
            accgen: config::ACCGEN_PORT,
            withdrawal: config::WITHDRAWAL_PORT,
            payment: config::PAYMENT_PORT,
            deposit: config::DEPOSIT_PORT,
            exchange: config::EXCHANGE_PORT,
            get: config::GET_PORT,
        }
    }
}
