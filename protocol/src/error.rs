//! Error types for the Aurum protocol.
//!
//! One exhaustive enum covers the failure modes of the crypto core, the six
//! wire sessions, and the persistence layer. Protocol-level rejections
//! ([`CashError::ExistingClient`], [`CashError::ExistingCoin`]) are ordinary
//! results a handler reports and survives; everything else aborts the
//! current session and rolls back any open transaction.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CashError>;

/// Errors that can occur across the Aurum protocol stack.
#[derive(Debug, Error)]
pub enum CashError {
    /// The scheme parameters fail their invariant (`p = 2q + 1`, both prime,
    /// generator in range).
    #[error("invalid scheme parameters: {0}")]
    InvalidScheme(String),

    /// Random sampling exhausted its attempt budget without producing a
    /// usable value (e.g. an invertible residue).
    #[error("randomness failure: {0}")]
    RngFailure(String),

    /// A client profile's identity hash does not match its public fields.
    #[error("client identity hash mismatch")]
    IdentityMismatch,

    /// Account generation was attempted for a client that is already
    /// registered.
    #[error("client already exists")]
    ExistingClient,

    /// A coin with this profile hash is already recorded in the ledger —
    /// the double-spend signal.
    #[error("coin already exists")]
    ExistingCoin,

    /// The presented client profile is not registered with this Bank.
    #[error("unknown client")]
    UnknownClient,

    /// The client's account balance cannot cover a withdrawal.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// A coin failed its blind-signature property checks.
    #[error("invalid coin: {0}")]
    InvalidCoin(String),

    /// The Elgamal payment identity did not verify.
    #[error("invalid elgamal signature")]
    InvalidElgamal,

    /// A wire frame could not be decoded (or exceeded the frame cap).
    #[error("wire decode failure: {0}")]
    WireDecode(String),

    /// TLS configuration or handshake failure.
    #[error("tls failure: {0}")]
    Tls(String),

    /// The persistent store rejected or lost an operation.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Underlying socket or filesystem I/O failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was invoked in a state that cannot serve it (e.g. a
    /// coin request before credentials were issued).
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<sled::Error> for CashError {
    fn from(e: sled::Error) -> Self {
        CashError::Persistence(e.to_string())
    }
}

impl From<bincode::Error> for CashError {
    fn from(e: bincode::Error) -> Self {
        CashError::WireDecode(e.to_string())
    }
}

impl From<rustls::Error> for CashError {
    fn from(e: rustls::Error) -> Self {
        CashError::Tls(e.to_string())
    }
}

impl CashError {
    /// True for protocol-level rejections that the peer caused and the
    /// handler reports without treating the session as broken.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CashError::ExistingClient
                | CashError::ExistingCoin
                | CashError::UnknownClient
                | CashError::InsufficientFunds
                | CashError::IdentityMismatch
                | CashError::InvalidCoin(_)
                | CashError::InvalidElgamal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_classified() {
        assert!(CashError::ExistingClient.is_rejection());
        assert!(CashError::ExistingCoin.is_rejection());
        assert!(CashError::InsufficientFunds.is_rejection());
        assert!(!CashError::Tls("handshake".into()).is_rejection());
        assert!(!CashError::Persistence("disk".into()).is_rejection());
    }
}
