//! # Session Servers
//!
//! Bank-side handlers for Setup, Accgen, Withdrawal, Deposit, and
//! Exchange, plus the merchant-side Payment and Get handlers. Each handler
//! drives exactly one session's message schedule over any async stream —
//! the accept loops wrap incoming TCP connections in TLS where the stage
//! requires it, while tests drive the same handlers over in-memory pipes.
//!
//! Handler errors never stop a listener: rejections (unknown client,
//! double spend, invalid coin) are logged at WARN and everything else at
//! ERROR, then the connection is dropped and the loop keeps accepting.

use chrono::Utc;
use num_bigint::BigUint;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::coin::{Coin, CoinProfile, CoinRequest};
use crate::error::{CashError, Result};
use crate::identity::{Bank, ClientProfile};
use crate::store::{BankStore, Operation, WalletStore};
use crate::wire::codec::{read_frame, timed, write_frame};
use crate::wire::{Credentials, Endpoints};

// ---------------------------------------------------------------------------
// Stage Handlers — Bank
// ---------------------------------------------------------------------------

/// Setup (1/6), plain TCP. One line with the Bank's name, then the raw PEM
/// certificate, then close.
pub async fn handle_setup<S>(stream: &mut S, bank_name: &str, cert_pem: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = Vec::with_capacity(bank_name.len() + 1 + cert_pem.len());
    reply.extend_from_slice(bank_name.as_bytes());
    reply.push(b'\n');
    reply.extend_from_slice(cert_pem);
    timed(stream.write_all(&reply)).await?;
    timed(stream.flush()).await?;
    Ok(())
}

/// Accgen (2/6). Sends the Bank profile, receives a client profile, and
/// issues credentials — unless the identity hash fails or the client
/// already exists, in which case the connection closes with no response.
pub async fn handle_accgen<S>(stream: &mut S, store: &BankStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bank = read_bank(store)?;
    write_frame(stream, &bank.profile()).await?;

    let profile: ClientProfile = read_frame(stream).await?;
    if store.read_client_info(&profile)?.is_some() {
        return Err(CashError::ExistingClient);
    }
    let info = bank.register_client(&profile)?;
    store.write_client_info(&info)?;

    write_frame(
        stream,
        &Credentials {
            credential: info.credential.clone(),
            contract: info.contract.clone(),
        },
    )
    .await?;
    tracing::debug!(client = %format!("{:x}", profile.digest()), "client registered");
    Ok(())
}

/// Withdrawal (3/6). Receives the client profile and a coin request,
/// debits the account, and answers with the blind-signed coin response.
///
/// Insufficient funds close the connection without a response; on the
/// wire this is indistinguishable from a failure, which is the schedule
/// the protocol fixes.
pub async fn handle_withdrawal<S>(stream: &mut S, store: &BankStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bank = read_bank(store)?;
    let profile: ClientProfile = read_frame(stream).await?;
    let request: CoinRequest = read_frame(stream).await?;

    let Some(info) = store.read_client_info(&profile)? else {
        return Err(CashError::UnknownClient);
    };
    store.debit_for_withdrawal(&profile)?;

    let issue = bank.issue_coin(&info, &request);
    write_frame(stream, &issue).await?;
    Ok(())
}

/// Deposit (5/6). Receives the client profile and a coin profile, runs
/// the full verification chain, records the coin, credits the account,
/// and answers with an acceptance flag.
///
/// A duplicate coin digest answers `false` — the double-spend rejection —
/// before the handler reports the rejection.
pub async fn handle_deposit<S>(stream: &mut S, store: &BankStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bank = read_bank(store)?;
    let bank_profile = bank.profile();

    let client: ClientProfile = read_frame(stream).await?;
    if store.read_client_info(&client)?.is_none() {
        return Err(CashError::UnknownClient);
    }

    let coin: CoinProfile = read_frame(stream).await?;
    coin.verify_properties(&bank_profile)?;
    if coin.is_expired(Utc::now()) {
        return Err(CashError::InvalidCoin("coin is expired".into()));
    }
    if !coin.is_payment_closed() {
        return Err(CashError::InvalidCoin(
            "coin was never signed over in a payment".into(),
        ));
    }
    coin.verify_elgamal(&bank.scheme)?;

    if let Err(e) = store.write_coin_profile(&coin, Operation::Deposit, &client) {
        if matches!(e, CashError::ExistingCoin) {
            tracing::warn!(coin = %format!("{:x}", coin.digest()), "double spend rejected at deposit");
            write_frame(stream, &false).await?;
        }
        return Err(e);
    }

    write_frame(stream, &true).await?;
    Ok(())
}

/// Exchange (6/6). A deposit of the old coin and a withdrawal of a fresh
/// one in a single session. The old coin's expiration is logged but does
/// not gate acceptance — an expired coin is exactly what exchange exists
/// to replace.
pub async fn handle_exchange<S>(stream: &mut S, store: &BankStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bank = read_bank(store)?;

    let client: ClientProfile = read_frame(stream).await?;
    let old: CoinProfile = read_frame(stream).await?;
    let request: CoinRequest = read_frame(stream).await?;

    let Some(info) = store.read_client_info(&client)? else {
        return Err(CashError::UnknownClient);
    };
    old.verify_properties(&bank.profile())?;

    let now = Utc::now();
    if old.is_expired(now) {
        tracing::warn!(coin = %format!("{:x}", old.digest()), "expired coin accepted for exchange");
    } else {
        let remaining = old.expiration - now;
        tracing::debug!(days = remaining.num_days(), "coin still valid");
    }

    store.write_coin_profile(&old, Operation::Exchange, &client)?;

    let issue = bank.issue_coin(&info, &request);
    write_frame(stream, &issue).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Stage Handlers — Merchant
// ---------------------------------------------------------------------------

/// Payment (4/6), merchant side. Verifies the presented coin, stamps the
/// Elgamal challenge, verifies the spender's signature, confirms
/// acceptance, and records the coin in the merchant's wallet.
pub async fn handle_payment<S>(stream: &mut S, store: &WalletStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client = store.read_client()?.ok_or_else(|| {
        CashError::InvalidState("merchant wallet has no client identity".into())
    })?;

    let mut coin: CoinProfile = read_frame(stream).await?;
    coin.verify_properties(&client.bank)?;
    if coin.is_expired(Utc::now()) {
        return Err(CashError::InvalidCoin("coin is expired".into()));
    }

    let msg = coin.stamp(&client.profile());
    write_frame(stream, &msg).await?;

    let second: BigUint = read_frame(stream).await?;
    coin.accept_signature(&client.bank, &second)?;

    write_frame(stream, &true).await?;
    store.write_coin(&Coin::from_profile(&coin), Operation::Payment)?;
    tracing::debug!(coin = %format!("{:x}", coin.digest()), "payment accepted");
    Ok(())
}

/// Get, plain TCP. The raw PEM certificate, then close.
pub async fn handle_get<S>(stream: &mut S, cert_pem: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timed(stream.write_all(cert_pem)).await?;
    timed(stream.flush()).await?;
    Ok(())
}

fn read_bank(store: &BankStore) -> Result<Bank> {
    store.read_bank()?.ok_or_else(|| {
        CashError::Persistence(format!(
            "no bank identity '{}' in store; run init first",
            store.identity()
        ))
    })
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// The TLS-gated Bank stages, for dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Accgen,
    Withdrawal,
    Deposit,
    Exchange,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Accgen => "Accgen",
            Stage::Withdrawal => "Withdrawal",
            Stage::Deposit => "Deposit",
            Stage::Exchange => "Exchange",
        };
        f.write_str(s)
    }
}

/// The Bank's five listeners and their shared state.
pub struct BankServer {
    pub store: Arc<BankStore>,
    pub acceptor: TlsAcceptor,
    pub bank_name: String,
    pub cert_pem: Vec<u8>,
}

impl BankServer {
    /// Binds all five well-known endpoints and serves until the process
    /// exits. Individual sessions never bring a listener down.
    pub async fn serve(self, endpoints: Endpoints) -> Result<()> {
        let setup = bind(endpoints.setup, "Setup").await?;
        let accgen = bind(endpoints.accgen, "Accgen").await?;
        let withdrawal = bind(endpoints.withdrawal, "Withdrawal").await?;
        let deposit = bind(endpoints.deposit, "Deposit").await?;
        let exchange = bind(endpoints.exchange, "Exchange").await?;

        let server = Arc::new(self);
        tokio::try_join!(
            Arc::clone(&server).listen_setup(setup),
            Arc::clone(&server).listen_stage(accgen, Stage::Accgen),
            Arc::clone(&server).listen_stage(withdrawal, Stage::Withdrawal),
            Arc::clone(&server).listen_stage(deposit, Stage::Deposit),
            Arc::clone(&server).listen_stage(exchange, Stage::Exchange),
        )?;
        Ok(())
    }

    /// Accept loop for the plain-TCP Setup stage.
    pub async fn listen_setup(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                tracing::info!(%peer, "serving client [Setup]");
                match handle_setup(&mut stream, &server.bank_name, &server.cert_pem).await
                {
                    Ok(()) => tracing::info!(%peer, "finished serving client [Setup]"),
                    Err(e) => tracing::error!(%peer, error = %e, "setup session failed"),
                }
            });
        }
    }

    /// Accept loop for one TLS-gated stage.
    pub async fn listen_stage(
        self: Arc<Self>,
        listener: TcpListener,
        stage: Stage,
    ) -> Result<()> {
        loop {
            let (tcp, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                tracing::info!(%peer, %stage, "serving client");
                let mut stream = match server.acceptor.accept(tcp).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(%peer, %stage, error = %e, "tls handshake failed");
                        return;
                    }
                };
                let result = match stage {
                    Stage::Accgen => handle_accgen(&mut stream, &server.store).await,
                    Stage::Withdrawal => {
                        handle_withdrawal(&mut stream, &server.store).await
                    }
                    Stage::Deposit => handle_deposit(&mut stream, &server.store).await,
                    Stage::Exchange => handle_exchange(&mut stream, &server.store).await,
                };
                log_outcome(peer, &stage.to_string(), result);
            });
        }
    }
}

/// A merchant's Payment and Get listeners.
pub struct MerchantServer {
    pub store: Arc<WalletStore>,
    pub acceptor: TlsAcceptor,
    pub cert_pem: Vec<u8>,
}

impl MerchantServer {
    /// Binds the Payment and Get endpoints and serves until the process
    /// exits.
    pub async fn serve(self, endpoints: Endpoints) -> Result<()> {
        let payment = bind(endpoints.payment, "Payment").await?;
        let get = bind(endpoints.get, "Get").await?;

        let server = Arc::new(self);
        tokio::try_join!(
            Arc::clone(&server).listen_payment(payment),
            Arc::clone(&server).listen_get(get)
        )?;
        Ok(())
    }

    /// Accept loop for the TLS-gated Payment stage.
    pub async fn listen_payment(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (tcp, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                tracing::info!(%peer, "serving client [Payment]");
                let mut stream = match server.acceptor.accept(tcp).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(%peer, error = %e, "tls handshake failed");
                        return;
                    }
                };
                log_outcome(peer, "Payment", handle_payment(&mut stream, &server.store).await);
            });
        }
    }

    /// Accept loop for the plain-TCP Get stage.
    pub async fn listen_get(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                tracing::info!(%peer, "serving client [Get]");
                match handle_get(&mut stream, &server.cert_pem).await {
                    Ok(()) => tracing::info!(%peer, "finished serving client [Get]"),
                    Err(e) => tracing::error!(%peer, error = %e, "get session failed"),
                }
            });
        }
    }
}

async fn bind(port: u16, stage: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "{stage} server listening");
    Ok(listener)
}

fn log_outcome(peer: std::net::SocketAddr, stage: &str, result: Result<()>) {
    match result {
        Ok(()) => tracing::info!(%peer, stage, "finished serving client"),
        Err(e) if e.is_rejection() => {
            tracing::warn!(%peer, stage, error = %e, "request rejected")
        }
        Err(e) => tracing::error!(%peer, stage, error = %e, "session failed"),
    }
}
