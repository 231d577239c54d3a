//! # Persistence
//!
//! Two stores over sled's embedded key-value engine, mirroring the two
//! roles: the Bank's ledger ([`BankStore`]) and a client's wallet
//! ([`WalletStore`]). Records are bincode blobs in named trees; every
//! mutation that spans keys runs inside a sled transaction, so a dropped
//! session never leaves partial state behind and concurrent handlers
//! serialize per key.
//!
//! sled supports lock-free concurrent readers with serialized writes,
//! which is exactly the concurrency contract the protocol needs: each
//! handler is one short transaction against the store.

pub mod bank;
pub mod wallet;

pub use bank::BankStore;
pub use wallet::WalletStore;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use std::fmt;
use std::path::Path;

use crate::error::{CashError, Result};

/// The operation a coin mutation is part of. Determines which side of the
/// local/remote balance pair moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Withdrawal,
    Payment,
    Deposit,
    Exchange,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Withdrawal => "Withdrawal",
            Operation::Payment => "Payment",
            Operation::Deposit => "Deposit",
            Operation::Exchange => "Exchange",
        };
        f.write_str(s)
    }
}

/// Opens (or creates) a database directory.
pub(crate) fn open_db(path: &Path) -> Result<sled::Db> {
    Ok(sled::open(path)?)
}

/// A throwaway in-memory database for tests.
pub(crate) fn temporary_db() -> Result<sled::Db> {
    Ok(sled::Config::new().temporary(true).open()?)
}

/// bincode-encodes a record for storage.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| CashError::Persistence(e.to_string()))
}

/// Decodes a stored record.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| CashError::Persistence(e.to_string()))
}

/// Collapses a sled transaction result: aborts carry our own error,
/// storage failures become [`CashError::Persistence`].
pub(crate) fn commit<T>(
    result: std::result::Result<T, TransactionError<CashError>>,
) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_display_names() {
        assert_eq!(Operation::Withdrawal.to_string(), "Withdrawal");
        assert_eq!(Operation::Exchange.to_string(), "Exchange");
    }

    #[test]
    fn encode_decode_round_trip() {
        let v: Vec<u64> = vec![1, 2, 3];
        let bytes = encode(&v).unwrap();
        let back: Vec<u64> = decode(&bytes).unwrap();
        assert_eq!(v, back);
    }
}
