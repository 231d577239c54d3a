//! # Session Executors
//!
//! Client-side drivers for the six stages (plus Get). Each `run_*`
//! function drives one session's message schedule over any async stream;
//! the same-named wrappers dial TCP (and TLS where the stage requires it)
//! against a Bank or merchant address. Wallet commits happen only at the
//! points the protocol defines — most importantly, a paid coin is deleted
//! only after the merchant's `accept` arrives.

use num_bigint::BigUint;
use rustls::ClientConfig;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::coin::CoinIssue;
use crate::config::cert_path;
use crate::crypto::RsaKey;
use crate::error::{CashError, Result};
use crate::identity::{BankProfile, Client};
use crate::store::{Operation, WalletStore};
use crate::wire::codec::{read_frame, timed, write_frame};
use crate::wire::tls::{client_config_from_pem, server_name};
use crate::wire::{Credentials, Endpoints};

// ---------------------------------------------------------------------------
// Connection Helpers
// ---------------------------------------------------------------------------

/// Dials a TLS-gated stage endpoint.
pub async fn connect_tls(
    server: &str,
    port: u16,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((server, port)).await?;
    let connector = TlsConnector::from(config);
    Ok(connector.connect(server_name(), tcp).await?)
}

// ---------------------------------------------------------------------------
// Setup (1/6) & Get
// ---------------------------------------------------------------------------

/// Drives the Setup schedule: one name line, then the certificate body.
///
/// The certificate is validated before anything is persisted — a
/// truncated or garbled stream leaves the wallet untouched.
pub async fn run_setup<S>(stream: S, store: &WalletStore, cert_file: &Path) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut name = String::new();
    timed(reader.read_line(&mut name)).await?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(CashError::WireDecode("empty bank name in setup".into()));
    }

    let mut pem = Vec::new();
    timed(reader.read_to_end(&mut pem)).await?;
    client_config_from_pem(&pem)
        .map_err(|_| CashError::WireDecode("truncated certificate in setup".into()))?;

    std::fs::write(cert_file, &pem)?;
    store.set_bank_name(&name)?;
    Ok(name)
}

/// Executes Setup against a Bank address, storing the certificate under
/// the well-known path keyed by that address.
pub async fn setup(
    server: &str,
    endpoints: &Endpoints,
    store: &WalletStore,
    dir: &Path,
) -> Result<String> {
    let stream = TcpStream::connect((server, endpoints.setup)).await?;
    tracing::info!(server, "connected to Setup server");
    let name = run_setup(stream, store, &cert_path(dir, server)).await?;
    tracing::info!(bank = %name, "certificate downloaded");
    Ok(name)
}

/// Drives the Get schedule: the certificate body, nothing else.
pub async fn run_get<S>(stream: S, cert_file: &Path) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut pem = Vec::new();
    timed(reader.read_to_end(&mut pem)).await?;
    client_config_from_pem(&pem)
        .map_err(|_| CashError::WireDecode("truncated certificate in get".into()))?;
    std::fs::write(cert_file, &pem)?;
    Ok(())
}

/// Fetches a merchant's certificate ahead of a Payment session.
pub async fn get_certificate(
    server: &str,
    endpoints: &Endpoints,
    dir: &Path,
) -> Result<()> {
    let stream = TcpStream::connect((server, endpoints.get)).await?;
    tracing::info!(server, "connected to Get server");
    run_get(stream, &cert_path(dir, server)).await
}

// ---------------------------------------------------------------------------
// Accgen (2/6)
// ---------------------------------------------------------------------------

/// Drives the Accgen schedule with a pre-generated RSA key. The fresh
/// client identity is persisted only once credentials arrive.
pub async fn run_accgen_with_key<S>(
    stream: &mut S,
    store: &WalletStore,
    key: RsaKey,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bank_profile: BankProfile = read_frame(stream).await?;
    let mut client = Client::with_key(bank_profile, key);
    write_frame(stream, &client.profile()).await?;

    let credentials: Credentials = read_frame(stream).await?;
    client.set_credentials(credentials.credential, credentials.contract);
    store.write_client(&client)?;
    tracing::info!("account generation succeeded");
    Ok(())
}

/// Drives the Accgen schedule, generating the client's RSA key inline.
pub async fn run_accgen<S>(stream: &mut S, store: &WalletStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = RsaKey::generate(crate::config::RSA_KEY_BITS)?;
    run_accgen_with_key(stream, store, key).await
}

/// Executes Accgen against a Bank address over TLS.
pub async fn accgen(
    server: &str,
    endpoints: &Endpoints,
    config: Arc<ClientConfig>,
    store: &WalletStore,
) -> Result<()> {
    let mut stream = connect_tls(server, endpoints.accgen, config).await?;
    tracing::info!(server, "connected to Accgen server");
    run_accgen(&mut stream, store).await
}

// ---------------------------------------------------------------------------
// Withdrawal (3/6)
// ---------------------------------------------------------------------------

/// Drives the Withdrawal schedule: profile, blinded request, response,
/// coin persisted. A silently closed stream (the Bank's insufficient-funds
/// signal) surfaces as an I/O error with no wallet change.
pub async fn run_withdraw<S>(stream: &mut S, store: &WalletStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client = require_client(store)?;
    write_frame(stream, &client.profile()).await?;

    let mut coin = client.request_coin()?;
    write_frame(stream, &coin.request_message()).await?;

    let issue: CoinIssue = read_frame(stream).await?;
    coin.finish(&client.bank, issue);
    store.write_coin(&coin, Operation::Withdrawal)?;
    tracing::info!("withdrawal succeeded");
    Ok(())
}

/// Executes Withdrawal against a Bank address over TLS.
pub async fn withdraw(
    server: &str,
    endpoints: &Endpoints,
    config: Arc<ClientConfig>,
    store: &WalletStore,
) -> Result<()> {
    let mut stream = connect_tls(server, endpoints.withdrawal, config).await?;
    tracing::info!(server, "connected to Withdrawal server");
    run_withdraw(&mut stream, store).await
}

// ---------------------------------------------------------------------------
// Payment (4/6)
// ---------------------------------------------------------------------------

/// Drives the spender side of a Payment. The coin leaves the wallet only
/// after the merchant's acceptance arrives — a session dropped before
/// that leaves the coin spendable.
pub async fn run_pay<S>(stream: &mut S, store: &WalletStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client = require_client(store)?;
    let mut coins = store.read_coins()?;
    if coins.is_empty() {
        tracing::warn!("no coins in wallet, nothing to pay");
        return Ok(());
    }
    let mut coin = coins.remove(0);

    write_frame(stream, &coin.profile()).await?;

    let msg: BigUint = read_frame(stream).await?;
    let second = coin.sign(&client.bank.scheme, &msg);
    write_frame(stream, &second).await?;

    let accept: bool = read_frame(stream).await?;
    if accept {
        store.delete_coin(&coin, Operation::Payment)?;
        tracing::info!("payment succeeded");
    } else {
        tracing::warn!("merchant declined the payment");
    }
    Ok(())
}

/// Executes Payment against a merchant address over TLS.
pub async fn pay(
    server: &str,
    endpoints: &Endpoints,
    config: Arc<ClientConfig>,
    store: &WalletStore,
) -> Result<()> {
    let mut stream = connect_tls(server, endpoints.payment, config).await?;
    tracing::info!(server, "connected to Payment server");
    run_pay(&mut stream, store).await
}

// ---------------------------------------------------------------------------
// Deposit (5/6)
// ---------------------------------------------------------------------------

/// Drives the Deposit schedule. The coin is removed from the wallet only
/// on an explicit `accept = true`.
pub async fn run_deposit<S>(stream: &mut S, store: &WalletStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client = require_client(store)?;
    let mut coins = store.read_coins()?;
    if coins.is_empty() {
        tracing::warn!("no coins in wallet, nothing to deposit");
        return Ok(());
    }
    let coin = coins.remove(0);

    write_frame(stream, &client.profile()).await?;
    write_frame(stream, &coin.profile()).await?;

    let accept: bool = read_frame(stream).await?;
    if accept {
        store.delete_coin(&coin, Operation::Deposit)?;
        tracing::info!("deposit succeeded");
        Ok(())
    } else {
        tracing::warn!("bank rejected the deposit");
        Err(CashError::ExistingCoin)
    }
}

/// Executes Deposit against a Bank address over TLS.
pub async fn deposit(
    server: &str,
    endpoints: &Endpoints,
    config: Arc<ClientConfig>,
    store: &WalletStore,
) -> Result<()> {
    let mut stream = connect_tls(server, endpoints.deposit, config).await?;
    tracing::info!(server, "connected to Deposit server");
    run_deposit(&mut stream, store).await
}

// ---------------------------------------------------------------------------
// Exchange (6/6)
// ---------------------------------------------------------------------------

/// Drives the Exchange schedule: old coin out, fresh request in the same
/// session, then an atomic old-for-new swap in the wallet.
pub async fn run_exchange<S>(stream: &mut S, store: &WalletStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client = require_client(store)?;
    let mut coins = store.read_coins()?;
    if coins.is_empty() {
        tracing::warn!("no coins in wallet, nothing to exchange");
        return Ok(());
    }
    let old = coins.remove(0);

    write_frame(stream, &client.profile()).await?;
    write_frame(stream, &old.profile()).await?;

    let mut fresh = client.request_coin()?;
    write_frame(stream, &fresh.request_message()).await?;

    let issue: CoinIssue = read_frame(stream).await?;
    fresh.finish(&client.bank, issue);
    store.swap_coin(&old, &fresh)?;
    tracing::info!("exchange succeeded");
    Ok(())
}

/// Executes Exchange against a Bank address over TLS.
pub async fn exchange(
    server: &str,
    endpoints: &Endpoints,
    config: Arc<ClientConfig>,
    store: &WalletStore,
) -> Result<()> {
    let mut stream = connect_tls(server, endpoints.exchange, config).await?;
    tracing::info!(server, "connected to Exchange server");
    run_exchange(&mut stream, store).await
}

fn require_client(store: &WalletStore) -> Result<Client> {
    store.read_client()?.ok_or_else(|| {
        CashError::InvalidState("wallet has no client; run accgen first".into())
    })
}
