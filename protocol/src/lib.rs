// Copyright (c) 2026 Aurum Labs. MIT License.
// See LICENSE for details.

//! # Aurum Protocol — Core Library
//!
//! Aurum is an offline-capable electronic cash scheme in the Brands/Chaum
//! lineage: a Bank blind-signs coins it cannot later link to the withdrawal,
//! clients pay each other peer-to-peer, and double spending is caught at
//! deposit time rather than prevented at payment time.
//!
//! The protocol is a coordinated set of six short-lived sessions, each with
//! its own well-known port and a fixed message schedule:
//!
//! | Stage      | Port | Channel   | What happens                              |
//! |------------|------|-----------|-------------------------------------------|
//! | Setup      | 9090 | plain TCP | client fetches the Bank's TLS certificate |
//! | Accgen     | 9091 | TLS       | Bank issues a credential/contract pair    |
//! | Withdrawal | 9092 | TLS       | Bank blind-signs a fresh coin             |
//! | Payment    | 9093 | TLS       | spender signs a coin over to a merchant   |
//! | Deposit    | 9094 | TLS       | merchant redeems a received coin          |
//! | Exchange   | 9095 | TLS       | spent-for-fresh coin swap in one session  |
//! | Get        | 9096 | plain TCP | merchant certificate fetch before Payment |
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the concerns of the scheme:
//!
//! - **crypto** — big-number arithmetic, safe-prime groups, RSA, hashing.
//! - **identity** — Bank and Client key material and their public profiles.
//! - **coin** — coin construction, blind-signature finalization, payment
//!   signatures, and verification.
//! - **wire** — message framing, the six session state machines, TLS gating.
//! - **store** — the Bank ledger and the client wallet over an embedded
//!   database.
//! - **config** — ports, sizes, and the embedded scheme parameters.
//!
//! ## Design Philosophy
//!
//! 1. The ledger is the source of truth; every handler is one short
//!    transaction against it.
//! 2. Sessions are strictly sequential request/response — no pipelining,
//!    no partial commits on a dropped connection.
//! 3. Anything that touches coin validity has tests.

pub mod coin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod store;
pub mod wire;

pub use coin::{Coin, CoinProfile};
pub use error::{CashError, Result};
pub use identity::{Bank, BankProfile, Client, ClientInfo, ClientProfile};
