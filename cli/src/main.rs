// Copyright (c) 2026 Aurum Labs. MIT License.
// See LICENSE for details.

//! # Aurum CLI
//!
//! Entry point for the `aurum` binary: a command-line payment application
//! over the Aurum blind-signature e-cash protocol.
//!
//! The `user` family covers wallet operations (init, accgen, withdraw,
//! charge, pay, deposit, exchange, inspect); the `bank` family covers the
//! ledger side (init, serve, inspect). Network stages run against a
//! bank's or merchant's well-known ports; certificates travel through the
//! Setup and Get stages and land in the Aurum base directory.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use aurum_protocol::config::{self, cert_path, db_path, key_path};
use aurum_protocol::crypto::SchemeParams;
use aurum_protocol::identity::Bank;
use aurum_protocol::store::{BankStore, WalletStore};
use aurum_protocol::wire::client as session;
use aurum_protocol::wire::server::{BankServer, MerchantServer};
use aurum_protocol::wire::{tls, Endpoints};

use cli::{AurumCli, BankCommands, Commands, UserCommands};
use logging::LogFormat;

fn main() -> Result<()> {
    let cli = AurumCli::parse();
    logging::init_logging("aurum=info,aurum_protocol=info", LogFormat::Pretty);

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: AurumCli) -> Result<()> {
    let dir = config::base_dir().context("failed to resolve the aurum directory")?;
    match cli.command {
        Commands::User(command) => run_user(command, &dir).await,
        Commands::Bank(command) => run_bank(command, &dir).await,
    }
}

// ---------------------------------------------------------------------------
// User Commands
// ---------------------------------------------------------------------------

async fn run_user(command: UserCommands, dir: &Path) -> Result<()> {
    match command {
        UserCommands::Init(args) => {
            WalletStore::open(&db_path(dir, &args.user))
                .context("failed to create wallet database")?;
            tls::create_certificate(dir, &args.user)
                .context("failed to create certificate")?;
            println!("User '{}' initialized in {}", args.user, dir.display());
            Ok(())
        }

        UserCommands::Accgen(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            let config = fetch_bank_certificate(&args.server, &wallet, dir).await?;
            session::accgen(&args.server, &Endpoints::default(), config, &wallet)
                .await
                .context("account generation failed")?;
            Ok(())
        }

        UserCommands::Withdraw(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            let config = fetch_bank_certificate(&args.server, &wallet, dir).await?;
            session::withdraw(&args.server, &Endpoints::default(), config, &wallet)
                .await
                .context("withdrawal failed")?;
            Ok(())
        }

        UserCommands::Charge(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            wallet.set_bank_name(&args.bank)?;

            let cert_file = cert_path(dir, &args.user);
            let server_config =
                tls::load_server_config(&cert_file, &key_path(dir, &args.user))
                    .context("failed to load the user's certificate pair")?;
            let cert_pem = std::fs::read(&cert_file)?;

            let merchant = MerchantServer {
                store: Arc::new(wallet),
                acceptor: TlsAcceptor::from(server_config),
                cert_pem,
            };
            merchant.serve(Endpoints::default()).await?;
            Ok(())
        }

        UserCommands::Pay(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            wallet.set_bank_name(&args.bank)?;

            // Fetch the merchant's certificate over the Get stage, then
            // pay over TLS authenticated by it.
            session::get_certificate(&args.server, &Endpoints::default(), dir)
                .await
                .context("failed to fetch the merchant certificate")?;
            let config = tls::load_client_config(&cert_path(dir, &args.server))?;
            session::pay(&args.server, &Endpoints::default(), config, &wallet)
                .await
                .context("payment failed")?;
            Ok(())
        }

        UserCommands::Deposit(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            let config = fetch_bank_certificate(&args.server, &wallet, dir).await?;
            session::deposit(&args.server, &Endpoints::default(), config, &wallet)
                .await
                .context("deposit failed")?;
            Ok(())
        }

        UserCommands::Exchange(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            let config = fetch_bank_certificate(&args.server, &wallet, dir).await?;
            session::exchange(&args.server, &Endpoints::default(), config, &wallet)
                .await
                .context("exchange failed")?;
            Ok(())
        }

        UserCommands::Inspect(args) => {
            let wallet = open_wallet(dir, &args.user)?;
            wallet.inspect(args.full)?;
            Ok(())
        }
    }
}

/// Opens an existing wallet, refusing to invent one for a typo'd name.
fn open_wallet(dir: &Path, user: &str) -> Result<WalletStore> {
    let path = db_path(dir, user);
    anyhow::ensure!(
        path.exists(),
        "no wallet database for user '{user}'; run `aurum user init` first"
    );
    Ok(WalletStore::open(&path)?)
}

/// Runs Setup against the bank and returns a TLS configuration trusting
/// the certificate it delivered.
async fn fetch_bank_certificate(
    server: &str,
    wallet: &WalletStore,
    dir: &Path,
) -> Result<Arc<tls::ClientConfig>> {
    session::setup(server, &Endpoints::default(), wallet, dir)
        .await
        .context("setup stage failed")?;
    Ok(tls::load_client_config(&cert_path(dir, server))?)
}

// ---------------------------------------------------------------------------
// Bank Commands
// ---------------------------------------------------------------------------

async fn run_bank(command: BankCommands, dir: &Path) -> Result<()> {
    match command {
        BankCommands::Init(args) => {
            let scheme = SchemeParams::embedded().clone();
            let bank = Bank::new(scheme).context("failed to generate bank identity")?;

            let store = BankStore::open(&db_path(dir, &args.bank), &args.identity)
                .context("failed to create ledger database")?;
            store.write_bank(&bank, &args.bank)?;
            tls::create_certificate(dir, &args.bank)
                .context("failed to create certificate")?;
            println!(
                "Bank '{}' (identity '{}') initialized in {}",
                args.bank,
                args.identity,
                dir.display()
            );
            Ok(())
        }

        BankCommands::Serve(args) => {
            let store = open_bank(dir, &args.bank, &args.identity)?;
            let name = store
                .bank_name()?
                .context("bank not initialized; run `aurum bank init` first")?;
            tracing::info!(bank = %name, "starting bank servers");

            let cert_file = cert_path(dir, &args.bank);
            let server_config =
                tls::load_server_config(&cert_file, &key_path(dir, &args.bank))
                    .context("failed to load the bank's certificate pair")?;
            let cert_pem = std::fs::read(&cert_file)?;

            let server = BankServer {
                store: Arc::new(store),
                acceptor: TlsAcceptor::from(server_config),
                bank_name: name,
                cert_pem,
            };
            server.serve(Endpoints::default()).await?;
            Ok(())
        }

        BankCommands::Inspect(args) => {
            let store = open_bank(dir, &args.bank, &args.identity)?;
            store.inspect(args.full)?;
            Ok(())
        }
    }
}

/// Opens an existing ledger, refusing to invent one for a typo'd name.
fn open_bank(dir: &Path, bank: &str, identity: &str) -> Result<BankStore> {
    let path: PathBuf = db_path(dir, bank);
    anyhow::ensure!(
        path.exists(),
        "no ledger database for bank '{bank}'; run `aurum bank init` first"
    );
    Ok(BankStore::open(&path, identity)?)
}
