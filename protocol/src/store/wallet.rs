//! # Client Wallet
//!
//! A wallet binds one client identity to one Bank and holds its coins:
//!
//! | Tree       | Key                   | Value                    |
//! |------------|-----------------------|--------------------------|
//! | `meta`     | `"bank_name"`         | Bank name (UTF-8)        |
//! | `accounts` | bank name (UTF-8)     | `bincode(WalletRecord)`  |
//! | `coins`    | coin digest (16B BE)  | `bincode(Coin)`          |
//!
//! Every coin mutation moves the local/remote balance pair in the same
//! transaction: Withdrawal is `local +1, remote −1`, Payment receipt is
//! `local +1`, a Payment spend is `local −1`, a Deposit is `local −1,
//! remote +1`, and an Exchange swap nets zero on both. The invariant
//! `local = count(coins)` holds after every commit.

use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::path::Path;

use crate::coin::Coin;
use crate::config::INITIAL_ACCOUNT_BALANCE;
use crate::error::{CashError, Result};
use crate::identity::Client;
use crate::store::{commit, decode, encode, open_db, temporary_db, Operation};

const BANK_NAME_KEY: &[u8] = b"bank_name";

/// The persisted client identity plus its balance pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    client: Client,
    local_balance: i64,
    remote_balance: i64,
}

/// A client's persistent wallet.
pub struct WalletStore {
    db: sled::Db,
    meta: sled::Tree,
    accounts: sled::Tree,
    coins: sled::Tree,
}

impl WalletStore {
    /// Opens (or creates) the wallet at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_db(open_db(path)?)
    }

    /// An in-memory wallet for tests.
    pub fn temporary() -> Result<Self> {
        Self::from_db(temporary_db()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let meta = db.open_tree("meta")?;
        let accounts = db.open_tree("accounts")?;
        let coins = db.open_tree("coins")?;
        Ok(WalletStore {
            db,
            meta,
            accounts,
            coins,
        })
    }

    // -- Bank binding --------------------------------------------------------

    /// Records which Bank this wallet talks to. Set by the Setup stage.
    pub fn set_bank_name(&self, name: &str) -> Result<()> {
        self.meta.insert(BANK_NAME_KEY, name.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// The configured Bank name, if Setup has run.
    pub fn bank_name(&self) -> Result<Option<String>> {
        match self.meta.get(BANK_NAME_KEY)? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    fn require_bank_name(&self) -> Result<String> {
        self.bank_name()?.ok_or_else(|| {
            CashError::InvalidState("wallet has no bank; run setup first".into())
        })
    }

    // -- Client identity -----------------------------------------------------

    /// Persists the client identity for the configured Bank. Idempotent:
    /// a second write for the same Bank name is a no-op.
    pub fn write_client(&self, client: &Client) -> Result<()> {
        let name = self.require_bank_name()?;
        let record = encode(&WalletRecord {
            client: client.clone(),
            local_balance: 0,
            remote_balance: INITIAL_ACCOUNT_BALANCE,
        })?;
        let existing = self.accounts.compare_and_swap(
            name.as_bytes(),
            None as Option<&[u8]>,
            Some(record),
        )?;
        if existing.is_err() {
            tracing::info!(bank = %name, "client already exists for bank, keeping it");
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }

    /// Reads the client identity for the configured Bank.
    pub fn read_client(&self) -> Result<Option<Client>> {
        let name = self.require_bank_name()?;
        match self.accounts.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(decode::<WalletRecord>(&bytes)?.client)),
            None => Ok(None),
        }
    }

    /// The `(local, remote)` balance pair.
    pub fn balances(&self) -> Result<(i64, i64)> {
        let name = self.require_bank_name()?;
        match self.accounts.get(name.as_bytes())? {
            Some(bytes) => {
                let record: WalletRecord = decode(&bytes)?;
                Ok((record.local_balance, record.remote_balance))
            }
            None => Ok((0, 0)),
        }
    }

    // -- Coins ---------------------------------------------------------------

    /// All coins currently in the wallet.
    pub fn read_coins(&self) -> Result<Vec<Coin>> {
        let mut coins = Vec::new();
        for entry in self.coins.iter() {
            let (_, value) = entry?;
            coins.push(decode(&value)?);
        }
        Ok(coins)
    }

    /// Adds a coin and moves the balance pair for `operation`.
    pub fn write_coin(&self, coin: &Coin, operation: Operation) -> Result<()> {
        let name = self.require_bank_name()?;
        let key = coin.profile().digest().to_be_bytes();
        let value = encode(coin)?;
        commit((&self.accounts, &self.coins).transaction(|(accounts, coins)| {
            if coins.get(key)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    CashError::ExistingCoin,
                ));
            }
            coins.insert(&key[..], value.clone())?;
            let mut record = read_record(accounts, &name)?;
            record.local_balance += 1;
            if operation == Operation::Withdrawal {
                record.remote_balance -= 1;
            }
            write_record(accounts, &name, &record)?;
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    /// Removes a coin and moves the balance pair for `operation`.
    pub fn delete_coin(&self, coin: &Coin, operation: Operation) -> Result<()> {
        let name = self.require_bank_name()?;
        let key = coin.profile().digest().to_be_bytes();
        commit((&self.accounts, &self.coins).transaction(|(accounts, coins)| {
            if coins.remove(&key[..])?.is_none() {
                return Err(ConflictableTransactionError::Abort(
                    CashError::InvalidState("coin not in wallet".into()),
                ));
            }
            let mut record = read_record(accounts, &name)?;
            record.local_balance -= 1;
            if operation == Operation::Deposit {
                record.remote_balance += 1;
            }
            write_record(accounts, &name, &record)?;
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    /// Atomically replaces `old` with `new` — the Exchange commit. Balances
    /// net to zero on both sides.
    pub fn swap_coin(&self, old: &Coin, new: &Coin) -> Result<()> {
        let old_key = old.profile().digest().to_be_bytes();
        let new_key = new.profile().digest().to_be_bytes();
        let new_value = encode(new)?;
        commit((&self.accounts, &self.coins).transaction(|(_, coins)| {
            if coins.remove(&old_key[..])?.is_none() {
                return Err(ConflictableTransactionError::Abort(
                    CashError::InvalidState("coin not in wallet".into()),
                ));
            }
            if coins.get(new_key)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    CashError::ExistingCoin,
                ));
            }
            coins.insert(&new_key[..], new_value.clone())?;
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    // -- Inspection ----------------------------------------------------------

    /// Prints a table of the wallet's contents to stdout.
    pub fn inspect(&self, full: bool) -> Result<()> {
        println!("\nCLIENT");
        println!("{:<12} {:<10} {:<10}", "Bank", "Local", "Remote");
        if let Some(name) = self.bank_name()? {
            let (local, remote) = self.balances()?;
            println!("{:<12} ${:<9} ${:<9}", name, local, remote);
            if full {
                if let Some(client) = self.read_client()? {
                    println!("{client}");
                }
            }
        }

        println!("\nCOIN");
        println!("{:<34} {:<23}", "CoinDigest", "Expiration");
        for coin in self.read_coins()? {
            let profile = coin.profile();
            println!(
                "{:<34x} {:<23}",
                profile.digest(),
                profile.expiration.format("%Y-%m-%d %H:%M:%S%.3f")
            );
            if full {
                println!("{profile}");
            }
        }
        Ok(())
    }
}

/// Reads the wallet record inside a transaction.
fn read_record(
    accounts: &sled::transaction::TransactionalTree,
    name: &str,
) -> std::result::Result<WalletRecord, ConflictableTransactionError<CashError>> {
    let Some(bytes) = accounts.get(name.as_bytes())? else {
        return Err(ConflictableTransactionError::Abort(CashError::InvalidState(
            "wallet has no client; run accgen first".into(),
        )));
    };
    decode(&bytes).map_err(ConflictableTransactionError::Abort)
}

/// Writes the wallet record inside a transaction.
fn write_record(
    accounts: &sled::transaction::TransactionalTree,
    name: &str,
    record: &WalletRecord,
) -> std::result::Result<(), ConflictableTransactionError<CashError>> {
    let value = encode(record).map_err(ConflictableTransactionError::Abort)?;
    accounts.insert(name.as_bytes(), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{RsaKey, SchemeParams};
    use crate::identity::{Bank, ClientInfo};

    fn world() -> (WalletStore, Bank, Client, ClientInfo) {
        let scheme = SchemeParams::generate(96).unwrap();
        let bank = Bank::with_key(scheme, RsaKey::generate(512).unwrap());
        let mut client =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        let info = bank.register_client(&client.profile()).unwrap();
        client.set_credentials(info.credential.clone(), info.contract.clone());

        let store = WalletStore::temporary().unwrap();
        store.set_bank_name("testbank").unwrap();
        store.write_client(&client).unwrap();
        (store, bank, client, info)
    }

    fn finished_coin(bank: &Bank, client: &Client, info: &ClientInfo) -> Coin {
        let mut coin = client.request_coin().unwrap();
        let issue = bank.issue_coin(info, &coin.request_message());
        coin.finish(&client.bank, issue);
        coin
    }

    #[test]
    fn client_write_is_idempotent_per_bank() {
        let (store, bank, client, _) = world();
        let other = Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        // A second write for the same bank name keeps the first identity.
        store.write_client(&other).unwrap();
        assert_eq!(store.read_client().unwrap().unwrap(), client);
    }

    #[test]
    fn operations_require_setup_first() {
        let store = WalletStore::temporary().unwrap();
        assert!(matches!(
            store.read_client(),
            Err(CashError::InvalidState(_))
        ));
    }

    #[test]
    fn withdrawal_moves_both_balances() {
        let (store, bank, client, info) = world();
        let coin = finished_coin(&bank, &client, &info);
        store.write_coin(&coin, Operation::Withdrawal).unwrap();
        assert_eq!(store.balances().unwrap(), (1, 99));
        assert_eq!(store.read_coins().unwrap().len(), 1);
    }

    #[test]
    fn payment_spend_only_moves_local() {
        let (store, bank, client, info) = world();
        let coin = finished_coin(&bank, &client, &info);
        store.write_coin(&coin, Operation::Withdrawal).unwrap();
        store.delete_coin(&coin, Operation::Payment).unwrap();
        assert_eq!(store.balances().unwrap(), (0, 99));
        assert!(store.read_coins().unwrap().is_empty());
    }

    #[test]
    fn deposit_returns_value_to_remote() {
        let (store, bank, client, info) = world();
        let coin = finished_coin(&bank, &client, &info);
        store.write_coin(&coin, Operation::Withdrawal).unwrap();
        store.delete_coin(&coin, Operation::Deposit).unwrap();
        assert_eq!(store.balances().unwrap(), (0, 100));
    }

    #[test]
    fn exchange_swap_preserves_cardinality_and_balances() {
        let (store, bank, client, info) = world();
        let old = finished_coin(&bank, &client, &info);
        let new = finished_coin(&bank, &client, &info);
        store.write_coin(&old, Operation::Withdrawal).unwrap();

        store.swap_coin(&old, &new).unwrap();
        assert_eq!(store.balances().unwrap(), (1, 99));
        let coins = store.read_coins().unwrap();
        assert_eq!(coins.len(), 1);
        assert_eq!(
            coins[0].profile().digest(),
            new.profile().digest()
        );
    }

    #[test]
    fn deleting_a_missing_coin_changes_nothing() {
        let (store, bank, client, info) = world();
        let coin = finished_coin(&bank, &client, &info);
        assert!(store.delete_coin(&coin, Operation::Payment).is_err());
        assert_eq!(store.balances().unwrap(), (0, 100));
    }

    #[test]
    fn local_balance_matches_coin_count() {
        let (store, bank, client, info) = world();
        for _ in 0..3 {
            let coin = finished_coin(&bank, &client, &info);
            store.write_coin(&coin, Operation::Withdrawal).unwrap();
        }
        let (local, _) = store.balances().unwrap();
        assert_eq!(local as usize, store.read_coins().unwrap().len());
    }
}
