//! Long-term identities of the two scheme roles and their public
//! projections. A [`Bank`] holds the group, an RSA key, and the discrete-log
//! pair `(x, z = g^x)`; a [`Client`] holds its own RSA key, identity numbers,
//! and — after account generation — the Bank-issued credential/contract pair
//! every coin is built from.

pub mod bank;
pub mod client;

pub use bank::{Bank, BankProfile};
pub use client::{Client, ClientInfo, ClientProfile};
