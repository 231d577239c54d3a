//! # Bank Ledger
//!
//! Three trees back the Bank:
//!
//! | Tree      | Key                     | Value                  |
//! |-----------|-------------------------|------------------------|
//! | `banks`   | identity (UTF-8)        | `bincode(BankRecord)`  |
//! | `clients` | profile digest (16B BE) | `bincode(ClientInfo)`  |
//! | `coins`   | profile digest (16B BE) | `bincode(CoinRecord)`  |
//!
//! The `coins` tree is the double-spend table: a coin digest is inserted
//! exactly once, inside the same transaction that credits the depositing
//! client, so two concurrent deposits of one coin resolve to exactly one
//! acceptance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::path::Path;

use crate::coin::CoinProfile;
use crate::error::{CashError, Result};
use crate::identity::{Bank, ClientInfo, ClientProfile};
use crate::store::{commit, decode, encode, open_db, temporary_db, Operation};

/// The persisted Bank identity plus its human-facing name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BankRecord {
    name: String,
    bank: Bank,
}

/// A redeemed coin as recorded in the double-spend table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinRecord {
    /// The coin's public profile as presented at redemption.
    pub profile: CoinProfile,
    /// Deposit or Exchange.
    pub operation: Operation,
    /// Digest of the client that redeemed the coin.
    pub client: u128,
    /// When the redemption committed.
    pub date: DateTime<Utc>,
}

/// The Bank's persistent ledger.
pub struct BankStore {
    db: sled::Db,
    banks: sled::Tree,
    clients: sled::Tree,
    coins: sled::Tree,
    identity: String,
}

impl BankStore {
    /// Opens the ledger at `path` for the given Bank identity.
    pub fn open(path: &Path, identity: &str) -> Result<Self> {
        Self::from_db(open_db(path)?, identity)
    }

    /// An in-memory ledger for tests.
    pub fn temporary(identity: &str) -> Result<Self> {
        Self::from_db(temporary_db()?, identity)
    }

    fn from_db(db: sled::Db, identity: &str) -> Result<Self> {
        let banks = db.open_tree("banks")?;
        let clients = db.open_tree("clients")?;
        let coins = db.open_tree("coins")?;
        Ok(BankStore {
            db,
            banks,
            clients,
            coins,
            identity: identity.to_string(),
        })
    }

    /// The identity this store was opened for.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    // -- Bank identity ------------------------------------------------------

    /// Persists the Bank identity under its name. Idempotent: if a record
    /// already exists for this identity, nothing is written.
    pub fn write_bank(&self, bank: &Bank, name: &str) -> Result<()> {
        let record = encode(&BankRecord {
            name: name.to_string(),
            bank: bank.clone(),
        })?;
        let existing = self.banks.compare_and_swap(
            self.identity.as_bytes(),
            None as Option<&[u8]>,
            Some(record),
        )?;
        if existing.is_err() {
            tracing::info!(identity = %self.identity, "bank identity already exists, keeping it");
            return Ok(());
        }
        self.db.flush()?;
        Ok(())
    }

    /// Reads the Bank identity, or `None` before `write_bank`.
    pub fn read_bank(&self) -> Result<Option<Bank>> {
        match self.banks.get(self.identity.as_bytes())? {
            Some(bytes) => Ok(Some(decode::<BankRecord>(&bytes)?.bank)),
            None => Ok(None),
        }
    }

    /// The Bank's public name, if initialized.
    pub fn bank_name(&self) -> Result<Option<String>> {
        match self.banks.get(self.identity.as_bytes())? {
            Some(bytes) => Ok(Some(decode::<BankRecord>(&bytes)?.name)),
            None => Ok(None),
        }
    }

    // -- Clients ------------------------------------------------------------

    /// Registers a client record. Fails with [`CashError::ExistingClient`]
    /// when the profile digest is already present.
    pub fn write_client_info(&self, info: &ClientInfo) -> Result<()> {
        let key = info.profile.digest().to_be_bytes();
        let value = encode(info)?;
        commit(self.clients.transaction(|tx| {
            if tx.get(key)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    CashError::ExistingClient,
                ));
            }
            tx.insert(&key[..], value.clone())?;
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    /// Looks up a client record by its profile digest.
    pub fn read_client_info(&self, profile: &ClientProfile) -> Result<Option<ClientInfo>> {
        match self.clients.get(profile.digest().to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The client's current balance. [`CashError::UnknownClient`] when the
    /// profile is not registered.
    pub fn read_client_balance(&self, profile: &ClientProfile) -> Result<i64> {
        self.read_client_info(profile)?
            .map(|info| info.balance)
            .ok_or(CashError::UnknownClient)
    }

    /// Overwrites the client's balance.
    pub fn update_client_balance(
        &self,
        profile: &ClientProfile,
        balance: i64,
    ) -> Result<()> {
        let key = profile.digest().to_be_bytes();
        commit(self.clients.transaction(|tx| {
            let Some(bytes) = tx.get(key)? else {
                return Err(ConflictableTransactionError::Abort(
                    CashError::UnknownClient,
                ));
            };
            let mut info: ClientInfo =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            info.balance = balance;
            let value = encode(&info).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&key[..], value)?;
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    /// Atomically checks and decrements the balance for a withdrawal.
    /// [`CashError::InsufficientFunds`] leaves the record untouched.
    pub fn debit_for_withdrawal(&self, profile: &ClientProfile) -> Result<()> {
        let key = profile.digest().to_be_bytes();
        commit(self.clients.transaction(|tx| {
            let Some(bytes) = tx.get(key)? else {
                return Err(ConflictableTransactionError::Abort(
                    CashError::UnknownClient,
                ));
            };
            let mut info: ClientInfo =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            if info.balance < 1 {
                return Err(ConflictableTransactionError::Abort(
                    CashError::InsufficientFunds,
                ));
            }
            info.balance -= 1;
            let value = encode(&info).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&key[..], value)?;
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    // -- Coins ---------------------------------------------------------------

    /// Checks the double-spend table for a coin digest.
    pub fn read_coin_profile(&self, profile: &CoinProfile) -> Result<Option<CoinRecord>> {
        match self.coins.get(profile.digest().to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Records a redeemed coin, linking it to the redeeming client.
    ///
    /// One transaction covers the duplicate check, the insertion, and —
    /// for deposits — the balance credit, so exactly one of any number of
    /// concurrent redemptions of the same coin succeeds.
    pub fn write_coin_profile(
        &self,
        profile: &CoinProfile,
        operation: Operation,
        client: &ClientProfile,
    ) -> Result<()> {
        let coin_key = profile.digest().to_be_bytes();
        let client_key = client.digest().to_be_bytes();
        let record = encode(&CoinRecord {
            profile: profile.clone(),
            operation,
            client: client.digest(),
            date: Utc::now(),
        })?;

        commit((&self.clients, &self.coins).transaction(|(clients, coins)| {
            if coins.get(coin_key)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    CashError::ExistingCoin,
                ));
            }
            coins.insert(&coin_key[..], record.clone())?;

            let Some(bytes) = clients.get(client_key)? else {
                return Err(ConflictableTransactionError::Abort(
                    CashError::UnknownClient,
                ));
            };
            if operation == Operation::Deposit {
                let mut info: ClientInfo =
                    decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                info.balance += 1;
                let value =
                    encode(&info).map_err(ConflictableTransactionError::Abort)?;
                clients.insert(&client_key[..], value)?;
            }
            Ok(())
        }))?;
        self.db.flush()?;
        Ok(())
    }

    // -- Inspection ----------------------------------------------------------

    /// All registered clients, keyed by digest.
    pub fn client_rows(&self) -> Result<Vec<(u128, ClientInfo)>> {
        let mut rows = Vec::new();
        for entry in self.clients.iter() {
            let (key, value) = entry?;
            let mut digest = [0u8; 16];
            digest.copy_from_slice(&key);
            rows.push((u128::from_be_bytes(digest), decode(&value)?));
        }
        Ok(rows)
    }

    /// All redeemed coins, keyed by digest.
    pub fn coin_rows(&self) -> Result<Vec<(u128, CoinRecord)>> {
        let mut rows = Vec::new();
        for entry in self.coins.iter() {
            let (key, value) = entry?;
            let mut digest = [0u8; 16];
            digest.copy_from_slice(&key);
            rows.push((u128::from_be_bytes(digest), decode(&value)?));
        }
        Ok(rows)
    }

    /// Prints a table of the ledger's contents to stdout.
    pub fn inspect(&self, full: bool) -> Result<()> {
        println!("\nBANK");
        println!("{:<10} {:<10}", "Name", "Identity");
        if let Some(name) = self.bank_name()? {
            println!("{:<10} {:<10}", name, self.identity);
        }

        println!("\nCLIENT INFO");
        println!("{:<34} {:<10}", "ClientDigest", "Balance");
        for (digest, info) in self.client_rows()? {
            println!("{:<34x} {:<10}", digest, info.balance);
            if full {
                println!("{info}");
            }
        }

        println!("\nCOIN PROFILE");
        println!(
            "{:<34} {:<10} {:<34} {:<23}",
            "CoinDigest", "Operation", "ClientDigest", "Date"
        );
        for (digest, record) in self.coin_rows()? {
            println!(
                "{:<34x} {:<10} {:<34x} {:<23}",
                digest,
                record.operation,
                record.client,
                record.date.format("%Y-%m-%d %H:%M:%S%.3f")
            );
            if full {
                println!("{}", record.profile);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin::Coin;
    use crate::crypto::{RsaKey, SchemeParams};
    use crate::identity::Client;

    fn world() -> (BankStore, Bank, Client, ClientInfo) {
        let scheme = SchemeParams::generate(96).unwrap();
        let bank = Bank::with_key(scheme, RsaKey::generate(512).unwrap());
        let store = BankStore::temporary("main").unwrap();
        store.write_bank(&bank, "testbank").unwrap();

        let mut client =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        let info = bank.register_client(&client.profile()).unwrap();
        client.set_credentials(info.credential.clone(), info.contract.clone());
        (store, bank, client, info)
    }

    fn deposited_profile(bank: &Bank, client: &Client, info: &ClientInfo) -> CoinProfile {
        let mut coin = client.request_coin().unwrap();
        let issue = bank.issue_coin(info, &coin.request_message());
        coin.finish(&client.bank, issue);
        coin.profile()
    }

    #[test]
    fn write_bank_is_idempotent() {
        let (store, bank, _, _) = world();
        // Second write with a different name must be a no-op.
        store.write_bank(&bank, "other-name").unwrap();
        assert_eq!(store.bank_name().unwrap().unwrap(), "testbank");
        assert_eq!(store.read_bank().unwrap().unwrap(), bank);
    }

    #[test]
    fn client_registration_and_duplicate() {
        let (store, _, client, info) = world();
        store.write_client_info(&info).unwrap();
        assert!(matches!(
            store.write_client_info(&info),
            Err(CashError::ExistingClient)
        ));
        let read = store.read_client_info(&client.profile()).unwrap().unwrap();
        assert_eq!(read, info);
    }

    #[test]
    fn balance_lifecycle() {
        let (store, _, client, info) = world();
        store.write_client_info(&info).unwrap();
        let profile = client.profile();

        assert_eq!(store.read_client_balance(&profile).unwrap(), 100);
        store.debit_for_withdrawal(&profile).unwrap();
        assert_eq!(store.read_client_balance(&profile).unwrap(), 99);

        store.update_client_balance(&profile, 0).unwrap();
        assert!(matches!(
            store.debit_for_withdrawal(&profile),
            Err(CashError::InsufficientFunds)
        ));
        assert_eq!(store.read_client_balance(&profile).unwrap(), 0);
    }

    #[test]
    fn unknown_client_is_reported() {
        let (store, bank, _, _) = world();
        let stranger =
            Client::with_key(bank.profile(), RsaKey::generate(512).unwrap());
        assert!(matches!(
            store.read_client_balance(&stranger.profile()),
            Err(CashError::UnknownClient)
        ));
        assert!(store.read_client_info(&stranger.profile()).unwrap().is_none());
    }

    #[test]
    fn deposit_inserts_once_and_credits() {
        let (store, bank, client, info) = world();
        store.write_client_info(&info).unwrap();
        let profile = deposited_profile(&bank, &client, &info);

        store
            .write_coin_profile(&profile, Operation::Deposit, &client.profile())
            .unwrap();
        assert_eq!(store.read_client_balance(&client.profile()).unwrap(), 101);

        let record = store.read_coin_profile(&profile).unwrap().unwrap();
        assert_eq!(record.operation, Operation::Deposit);
        assert_eq!(record.client, client.profile().digest());

        // Second redemption of the same coin is the double-spend signal,
        // and the balance must not move again.
        assert!(matches!(
            store.write_coin_profile(&profile, Operation::Deposit, &client.profile()),
            Err(CashError::ExistingCoin)
        ));
        assert_eq!(store.read_client_balance(&client.profile()).unwrap(), 101);
    }

    #[test]
    fn exchange_does_not_touch_balance() {
        let (store, bank, client, info) = world();
        store.write_client_info(&info).unwrap();
        let profile = deposited_profile(&bank, &client, &info);

        store
            .write_coin_profile(&profile, Operation::Exchange, &client.profile())
            .unwrap();
        assert_eq!(store.read_client_balance(&client.profile()).unwrap(), 100);
        assert!(store.read_coin_profile(&profile).unwrap().is_some());
    }

    #[test]
    fn concurrent_deposits_accept_exactly_one() {
        let (store, bank, client, info) = world();
        store.write_client_info(&info).unwrap();
        let profile = deposited_profile(&bank, &client, &info);

        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            let profile = profile.clone();
            let who = client.profile();
            handles.push(std::thread::spawn(move || {
                store.write_coin_profile(&profile, Operation::Deposit, &who)
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        assert_eq!(store.read_client_balance(&client.profile()).unwrap(), 101);
    }

    #[test]
    fn received_coin_round_trips_through_record() {
        let (store, bank, client, info) = world();
        store.write_client_info(&info).unwrap();
        let profile = deposited_profile(&bank, &client, &info);
        store
            .write_coin_profile(&profile, Operation::Deposit, &client.profile())
            .unwrap();

        let record = store.read_coin_profile(&profile).unwrap().unwrap();
        // The stored profile still reconstructs a depositable coin.
        assert_eq!(
            Coin::from_profile(&record.profile).profile().digest(),
            profile.digest()
        );
    }
}
